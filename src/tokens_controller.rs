use arc_swap::ArcSwap;
use ethers::types::Address;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::change_detection::normalize_address;
use crate::errors::AssetsError;
use crate::events::{ControllerEvent, EventSender};
use crate::providers::{AccountsProvider, TokensProvider};
use crate::types::{ChainId, Token, TokensSnapshot};

/// Per chain and account token collections: added, detected and ignored.
///
/// Mutations run one at a time under an async lock and each publishes a
/// `TokensStateChanged` event. Readers get lock-free snapshots.
pub struct TokensController {
    state: ArcSwap<TokensSnapshot>,
    mutation: Mutex<()>,
    accounts: Arc<dyn AccountsProvider>,
    events: Option<EventSender>,
}

impl TokensController {
    pub fn new(accounts: Arc<dyn AccountsProvider>, events: Option<EventSender>) -> Self {
        Self::with_initial_state(accounts, events, TokensSnapshot::default())
    }

    pub fn with_initial_state(
        accounts: Arc<dyn AccountsProvider>,
        events: Option<EventSender>,
        initial_state: TokensSnapshot,
    ) -> Self {
        Self {
            state: ArcSwap::from_pointee(initial_state),
            mutation: Mutex::new(()),
            accounts,
            events,
        }
    }

    pub fn snapshot(&self) -> Arc<TokensSnapshot> {
        self.state.load_full()
    }

    /// Adds `tokens` for the selected account, replacing entries with the same
    /// address. Added tokens stop being detected or ignored.
    pub async fn add_tokens(&self, chain_id: ChainId, tokens: Vec<Token>) -> Result<(), AssetsError> {
        let tokens = normalize_tokens(tokens)?;
        self.mutate(chain_id, |snapshot, account| {
            let added: Vec<&str> = tokens.iter().map(|t| t.address.as_str()).collect();
            retain_by_address(detected_mut(snapshot, chain_id, account), |a| !added.contains(&a));
            ignored_mut(snapshot, chain_id, account).retain(|a| !added.contains(&a.as_str()));

            let list = tokens_mut(snapshot, chain_id, account);
            for token in &tokens {
                match list.iter_mut().find(|t| t.address == token.address) {
                    Some(existing) => *existing = token.clone(),
                    None => list.push(token.clone()),
                }
            }
            info!("Added {} tokens on chain {} for {:?}", tokens.len(), chain_id, account);
        })
        .await
    }

    /// Hides `addresses` for the selected account on `chain_id`.
    pub async fn ignore_tokens(&self, chain_id: ChainId, addresses: Vec<String>) -> Result<(), AssetsError> {
        let addresses = addresses
            .iter()
            .map(|a| checksum(a))
            .collect::<Result<Vec<_>, _>>()?;
        self.mutate(chain_id, |snapshot, account| {
            retain_by_address(tokens_mut(snapshot, chain_id, account), |a| !addresses.iter().any(|i| i == a));
            retain_by_address(detected_mut(snapshot, chain_id, account), |a| !addresses.iter().any(|i| i == a));

            let ignored = ignored_mut(snapshot, chain_id, account);
            for address in &addresses {
                if !ignored.contains(address) {
                    ignored.push(address.clone());
                }
            }
            debug!("Ignored {} tokens on chain {}", addresses.len(), chain_id);
        })
        .await
    }

    /// Records auto-detected tokens. Tokens already added or ignored are skipped.
    pub async fn add_detected_tokens(&self, chain_id: ChainId, tokens: Vec<Token>) -> Result<(), AssetsError> {
        let tokens = normalize_tokens(tokens)?;
        self.mutate(chain_id, |snapshot, account| {
            let known: Vec<String> = snapshot
                .tokens_for(chain_id, account)
                .iter()
                .map(|t| t.address.clone())
                .chain(snapshot.ignored_tokens_for(chain_id, account).iter().cloned())
                .collect();

            let detected = detected_mut(snapshot, chain_id, account);
            for token in tokens.iter().filter(|t| !known.contains(&t.address)) {
                match detected.iter_mut().find(|t| t.address == token.address) {
                    Some(existing) => *existing = token.clone(),
                    None => detected.push(token.clone()),
                }
            }
            debug!("Detected tokens on chain {} now {}", chain_id, detected.len());
        })
        .await
    }

    /// Runs `apply` on a copy of the state under the mutation lock, then
    /// publishes the result.
    async fn mutate<F>(&self, chain_id: ChainId, apply: F) -> Result<(), AssetsError>
    where
        F: FnOnce(&mut TokensSnapshot, Address),
    {
        let account = self
            .accounts
            .selected_account()
            .ok_or(AssetsError::NoSelectedAccount)?;

        let _guard = self.mutation.lock().await;
        let mut next = TokensSnapshot::clone(&self.state.load());
        apply(&mut next, account);
        let next = Arc::new(next);
        self.state.store(Arc::clone(&next));

        if let Some(events) = &self.events {
            let _ = events.send(ControllerEvent::TokensStateChanged(next));
        }
        debug!("Tokens state changed on chain {}", chain_id);
        Ok(())
    }
}

impl TokensProvider for TokensController {
    fn tokens_snapshot(&self) -> Arc<TokensSnapshot> {
        self.snapshot()
    }
}

fn checksum(raw: &str) -> Result<String, AssetsError> {
    raw.trim()
        .parse::<Address>()
        .map(|_| normalize_address(raw))
        .map_err(|_| AssetsError::InvalidAddress(raw.to_string()))
}

fn normalize_tokens(tokens: Vec<Token>) -> Result<Vec<Token>, AssetsError> {
    tokens
        .into_iter()
        .map(|mut token| {
            token.address = checksum(&token.address)?;
            Ok(token)
        })
        .collect()
}

fn retain_by_address(tokens: &mut Vec<Token>, keep: impl Fn(&str) -> bool) {
    tokens.retain(|t| keep(t.address.as_str()));
}

fn tokens_mut(snapshot: &mut TokensSnapshot, chain_id: ChainId, account: Address) -> &mut Vec<Token> {
    snapshot.all_tokens.entry(chain_id).or_default().entry(account).or_default()
}

fn detected_mut(snapshot: &mut TokensSnapshot, chain_id: ChainId, account: Address) -> &mut Vec<Token> {
    snapshot
        .all_detected_tokens
        .entry(chain_id)
        .or_default()
        .entry(account)
        .or_default()
}

fn ignored_mut(snapshot: &mut TokensSnapshot, chain_id: ChainId, account: Address) -> &mut Vec<String> {
    snapshot
        .all_ignored_tokens
        .entry(chain_id)
        .or_default()
        .entry(account)
        .or_default()
}
