//! Decides whether a token-set change warrants a rate refresh.
//!
//! Everything here is pure: it compares two snapshots and never touches the
//! network or controller state, so it can be tested without any plumbing.

use ethers::types::Address;
use ethers::utils::to_checksum;
use std::collections::BTreeSet;

use crate::types::{ChainId, TokensSnapshot};

/// EIP-55 checksum form of `raw`.
///
/// Input that is not a 20-byte hex address is trimmed and lowercased, so two
/// spellings of the same garbage still compare equal.
pub fn normalize_address(raw: &str) -> String {
    match raw.trim().parse::<Address>() {
        Ok(address) => to_checksum(&address, None),
        Err(_) => raw.trim().to_lowercase(),
    }
}

/// Normalized union of the added and detected tokens of `account` on `chain_id`.
///
/// A token that moves from "detected" to "added" does not change this set.
pub fn token_address_set(
    snapshot: &TokensSnapshot,
    chain_id: ChainId,
    account: Address,
) -> BTreeSet<String> {
    snapshot
        .tokens_for(chain_id, account)
        .iter()
        .chain(snapshot.detected_tokens_for(chain_id, account))
        .map(|token| normalize_address(&token.address))
        .collect()
}

/// `true` when a normalized address was added or removed between the two collections.
///
/// Ordering and hex casing of the inputs never matter.
pub fn should_refresh<P, N, S, T>(previous: P, next: N) -> bool
where
    P: IntoIterator<Item = S>,
    N: IntoIterator<Item = T>,
    S: AsRef<str>,
    T: AsRef<str>,
{
    let previous: BTreeSet<String> = previous
        .into_iter()
        .map(|a| normalize_address(a.as_ref()))
        .collect();
    let next: BTreeSet<String> = next
        .into_iter()
        .map(|a| normalize_address(a.as_ref()))
        .collect();
    previous != next
}

/// Chains whose token address set for `account` differs between the snapshots.
pub fn changed_chains(
    previous: &TokensSnapshot,
    next: &TokensSnapshot,
    account: Address,
) -> Vec<ChainId> {
    let mut chains: BTreeSet<ChainId> = previous.chain_ids().into_iter().collect();
    chains.extend(next.chain_ids());

    chains
        .into_iter()
        .filter(|chain_id| {
            token_address_set(previous, *chain_id, account)
                != token_address_set(next, *chain_id, account)
        })
        .collect()
}

/// Chains where the token address set of any account differs between the snapshots.
pub fn changed_chains_for_any_account(previous: &TokensSnapshot, next: &TokensSnapshot) -> Vec<ChainId> {
    let mut chains: BTreeSet<ChainId> = previous.chain_ids().into_iter().collect();
    chains.extend(next.chain_ids());

    chains
        .into_iter()
        .filter(|chain_id| {
            let mut accounts = previous.accounts_on(*chain_id);
            accounts.extend(next.accounts_on(*chain_id));
            accounts.into_iter().any(|account| {
                token_address_set(previous, *chain_id, account)
                    != token_address_set(next, *chain_id, account)
            })
        })
        .collect()
}

/// Addresses to price on `chain_id`: every account's added and detected tokens.
///
/// Sorted by checksum form; entries that are not valid addresses are skipped.
pub fn chain_token_addresses(snapshot: &TokensSnapshot, chain_id: ChainId) -> Vec<Address> {
    snapshot
        .accounts_on(chain_id)
        .into_iter()
        .flat_map(|account| token_address_set(snapshot, chain_id, account))
        .collect::<BTreeSet<String>>()
        .into_iter()
        .filter_map(|address| address.parse::<Address>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Token;

    const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";
    const LINK: &str = "0x514910771AF9Ca656af840dff83E8264EcF986CA";

    fn account() -> Address {
        Address::repeat_byte(0x42)
    }

    fn snapshot(chain_id: ChainId, tokens: &[&str], detected: &[&str]) -> TokensSnapshot {
        let mut snapshot = TokensSnapshot::default();
        snapshot.all_tokens.entry(chain_id).or_default().insert(
            account(),
            tokens.iter().map(|a| Token::new(*a, "TKN", 18)).collect(),
        );
        snapshot.all_detected_tokens.entry(chain_id).or_default().insert(
            account(),
            detected.iter().map(|a| Token::new(*a, "TKN", 18)).collect(),
        );
        snapshot
    }

    #[test]
    fn normalize_checksums_valid_addresses() {
        assert_eq!(normalize_address(&USDC.to_lowercase()), USDC);
        assert_eq!(normalize_address(&USDC.to_uppercase().replace("0X", "0x")), USDC);
        assert_eq!(normalize_address("  NotAnAddress "), "notanaddress");
    }

    #[test]
    fn reordering_is_not_a_change() {
        assert!(!should_refresh([USDC, DAI, LINK], [LINK, USDC, DAI]));
    }

    #[test]
    fn casing_is_not_a_change() {
        let lower: Vec<String> = [USDC, DAI].iter().map(|a| a.to_lowercase()).collect();
        assert!(!should_refresh([USDC, DAI], lower));
    }

    #[test]
    fn additions_and_removals_are_changes() {
        assert!(should_refresh([USDC], [USDC, DAI]));
        assert!(should_refresh([USDC, DAI], [DAI]));
        assert!(should_refresh(Vec::<&str>::new(), [LINK]));
    }

    #[test]
    fn moving_between_added_and_detected_is_not_a_change() {
        let before = snapshot(ChainId::MAINNET, &[USDC], &[DAI]);
        let after = snapshot(ChainId::MAINNET, &[USDC, DAI], &[]);
        assert!(changed_chains(&before, &after, account()).is_empty());
    }

    #[test]
    fn metadata_edits_are_not_a_change() {
        let before = snapshot(ChainId::MAINNET, &[USDC], &[]);
        let mut after = before.clone();
        let token = &mut after
            .all_tokens
            .get_mut(&ChainId::MAINNET)
            .unwrap()
            .get_mut(&account())
            .unwrap()[0];
        token.decimals = 6;
        token.symbol = "USDC".into();
        assert!(changed_chains(&before, &after, account()).is_empty());
    }

    #[test]
    fn only_the_chain_that_changed_is_reported() {
        let mut before = snapshot(ChainId::MAINNET, &[USDC], &[]);
        before
            .all_tokens
            .entry(ChainId::POLYGON)
            .or_default()
            .insert(account(), vec![Token::new(DAI, "DAI", 18)]);
        let mut after = before.clone();
        after
            .all_tokens
            .get_mut(&ChainId::POLYGON)
            .unwrap()
            .get_mut(&account())
            .unwrap()
            .push(Token::new(LINK, "LINK", 18));

        assert_eq!(changed_chains(&before, &after, account()), vec![ChainId::POLYGON]);
    }

    #[test]
    fn other_accounts_are_ignored() {
        let before = snapshot(ChainId::MAINNET, &[USDC], &[]);
        let mut after = before.clone();
        after
            .all_tokens
            .get_mut(&ChainId::MAINNET)
            .unwrap()
            .insert(Address::repeat_byte(0x99), vec![Token::new(DAI, "DAI", 18)]);
        assert!(changed_chains(&before, &after, account()).is_empty());
    }

    #[test]
    fn any_account_change_reports_the_chain() {
        let before = snapshot(ChainId::MAINNET, &[USDC], &[]);
        let mut after = before.clone();
        after
            .all_detected_tokens
            .get_mut(&ChainId::MAINNET)
            .unwrap()
            .insert(Address::repeat_byte(0x99), vec![Token::new(DAI, "DAI", 18)]);

        assert_eq!(changed_chains_for_any_account(&before, &after), vec![ChainId::MAINNET]);
        assert!(changed_chains_for_any_account(&after, &after.clone()).is_empty());
    }

    #[test]
    fn chain_addresses_union_accounts_and_skip_garbage() {
        let mut snapshot = snapshot(ChainId::MAINNET, &[USDC, "junk"], &[DAI]);
        snapshot
            .all_tokens
            .get_mut(&ChainId::MAINNET)
            .unwrap()
            .insert(Address::repeat_byte(0x99), vec![Token::new(USDC.to_lowercase(), "USDC", 6)]);

        let addresses = chain_token_addresses(&snapshot, ChainId::MAINNET);
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains(&USDC.parse().unwrap()));
        assert!(addresses.contains(&DAI.parse().unwrap()));
        assert!(chain_token_addresses(&snapshot, ChainId::POLYGON).is_empty());
    }
}
