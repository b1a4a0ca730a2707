#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Barrier, Mutex, RwLock};

use sha2::{Digest, Sha256};

use wardgate_auth::{
    AuditSink, AuthConfig, Authenticator, Credential, Group, IdentityStore, PasswordError,
    PasswordHasher, PasswordValue, SigningKey, StoreError, TokenCodec, TokenTtls,
};
use wardgate_core::UserId;

#[derive(Default)]
struct State {
    credentials: HashMap<UserId, Credential>,
    groups: HashMap<UserId, Vec<Group>>,
    blocked: HashSet<UserId>,
    unavailable: bool,
}

/// Identity store backed by a map; enough for exercising the flows.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    inner: RwLock<State>,
    lookup_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn assign_groups(&self, user_id: UserId, groups: Vec<Group>) {
        self.inner.write().unwrap().groups.insert(user_id, groups);
    }

    pub fn block(&self, user_id: UserId) {
        self.inner.write().unwrap().blocked.insert(user_id);
    }

    /// Administrative disable, as another request would do it.
    pub fn disable(&self, user_id: UserId) {
        if let Some(c) = self.inner.write().unwrap().credentials.get_mut(&user_id) {
            c.enabled = false;
        }
    }

    pub fn require_password_change(&self, user_id: UserId) {
        if let Some(c) = self.inner.write().unwrap().credentials.get_mut(&user_id) {
            c.must_change_password = true;
        }
    }

    /// Hold every `find_by_login` at `barrier` until enough callers arrive.
    pub fn set_lookup_barrier(&self, barrier: Option<Arc<Barrier>>) {
        *self.lookup_barrier.lock().unwrap() = barrier;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().unwrap().unavailable = unavailable;
    }

    pub fn credential(&self, user_id: UserId) -> Option<Credential> {
        self.inner.read().unwrap().credentials.get(&user_id).cloned()
    }

    fn check_available(state: &State) -> Result<(), StoreError> {
        if state.unavailable {
            return Err(StoreError::Unavailable("test store offline".to_string()));
        }
        Ok(())
    }

    /// Mutate one credential under the write lock.
    fn with_credential<R>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut Credential) -> R,
    ) -> Result<R, StoreError> {
        let mut state = self.inner.write().unwrap();
        Self::check_available(&state)?;
        let credential = state
            .credentials
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound)?;
        Ok(f(credential))
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn find_by_login(&self, login: &str) -> Result<Option<Credential>, StoreError> {
        let found = {
            let state = self.inner.read().unwrap();
            Self::check_available(&state)?;
            state
                .credentials
                .values()
                .find(|c| c.login == login)
                .cloned()
        };
        let barrier = self.lookup_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait();
        }
        Ok(found)
    }

    fn find_by_user(&self, user_id: UserId) -> Result<Option<Credential>, StoreError> {
        let state = self.inner.read().unwrap();
        Self::check_available(&state)?;
        Ok(state.credentials.get(&user_id).cloned())
    }

    fn is_enabled_and_not_blocked(&self, user_id: UserId) -> Result<bool, StoreError> {
        let state = self.inner.read().unwrap();
        Self::check_available(&state)?;
        let enabled = state
            .credentials
            .get(&user_id)
            .is_some_and(|c| c.enabled);
        Ok(enabled && !state.blocked.contains(&user_id))
    }

    fn groups_of(&self, user_id: UserId) -> Result<Vec<Group>, StoreError> {
        let state = self.inner.read().unwrap();
        Self::check_available(&state)?;
        Ok(state.groups.get(&user_id).cloned().unwrap_or_default())
    }

    fn create_credential(&self, credential: Credential) -> Result<(), StoreError> {
        let mut state = self.inner.write().unwrap();
        Self::check_available(&state)?;
        if state.credentials.values().any(|c| c.login == credential.login) {
            return Err(StoreError::Conflict(credential.login));
        }
        state.credentials.insert(credential.user_id, credential);
        Ok(())
    }

    fn update_password(&self, user_id: UserId, password_hash: &str) -> Result<(), StoreError> {
        self.with_credential(user_id, |c| {
            c.password_hash = password_hash.to_string();
            c.must_change_password = false;
        })
    }

    fn set_second_factor(
        &self,
        user_id: UserId,
        secret: &str,
        backup_codes: &BTreeSet<String>,
    ) -> Result<bool, StoreError> {
        self.with_credential(user_id, |c| {
            if c.has_totp() {
                return false;
            }
            c.totp_secret = Some(secret.to_string());
            c.backup_codes = backup_codes.clone();
            true
        })
    }

    fn clear_second_factor(&self, user_id: UserId) -> Result<(), StoreError> {
        self.with_credential(user_id, |c| {
            c.totp_secret = None;
            c.backup_codes.clear();
        })
    }

    fn consume_backup_code(&self, user_id: UserId, code: &str) -> Result<bool, StoreError> {
        self.with_credential(user_id, |c| c.backup_codes.remove(code))
    }

    fn record_failed_logon(&self, user_id: UserId) -> Result<u32, StoreError> {
        let mut state = self.inner.write().unwrap();
        Self::check_available(&state)?;
        let credential = state
            .credentials
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound)?;
        credential.logon_trial_count += 1;
        Ok(credential.logon_trial_count)
    }

    fn reset_logon_trials(&self, user_id: UserId) -> Result<(), StoreError> {
        let mut state = self.inner.write().unwrap();
        Self::check_available(&state)?;
        let credential = state
            .credentials
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound)?;
        credential.logon_trial_count = 0;
        Ok(())
    }
}

/// Salted SHA-256. Only for tests; real deployments plug in a slow KDF.
pub struct Sha256Hasher;

impl Sha256Hasher {
    fn digest(password: &PasswordValue) -> Result<String, PasswordError> {
        password.with_str(|plain| {
            let digest = Sha256::new()
                .chain_update(b"wardgate-test-salt:")
                .chain_update(plain.as_bytes())
                .finalize();
            digest.iter().map(|b| format!("{b:02x}")).collect()
        })
    }
}

impl PasswordHasher for Sha256Hasher {
    fn hash(&self, password: &PasswordValue) -> Result<String, PasswordError> {
        Self::digest(password)
    }

    fn verify(&self, password: &PasswordValue, stored_hash: &str) -> bool {
        Self::digest(password).is_ok_and(|h| h == stored_hash)
    }
}

/// Hasher that disables `target` in the store while a verification runs,
/// standing in for an administrator acting mid-request.
pub struct DisablingHasher {
    pub store: Arc<InMemoryIdentityStore>,
    pub target: Mutex<Option<UserId>>,
}

impl DisablingHasher {
    pub fn new(store: Arc<InMemoryIdentityStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            target: Mutex::new(None),
        })
    }

    pub fn arm(&self, user_id: UserId) {
        *self.target.lock().unwrap() = Some(user_id);
    }
}

impl PasswordHasher for DisablingHasher {
    fn hash(&self, password: &PasswordValue) -> Result<String, PasswordError> {
        Sha256Hasher.hash(password)
    }

    fn verify(&self, password: &PasswordValue, stored_hash: &str) -> bool {
        if let Some(user_id) = self.target.lock().unwrap().take() {
            self.store.disable(user_id);
        }
        Sha256Hasher.verify(password, stored_hash)
    }
}

/// Audit sink that keeps every call for later assertions.
#[derive(Default)]
pub struct RecordingAuditSink {
    calls: Mutex<Vec<AuditCall>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditCall {
    pub bucket: &'static str,
    pub user: Option<UserId>,
    pub events: Vec<String>,
}

impl RecordingAuditSink {
    pub fn calls(&self) -> Vec<AuditCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, bucket: &'static str, user: Option<UserId>, events: &[&str]) {
        self.calls.lock().unwrap().push(AuditCall {
            bucket,
            user,
            events: events.iter().map(|e| e.to_string()).collect(),
        });
    }
}

impl AuditSink for RecordingAuditSink {
    fn on_important_error(&self, user: Option<UserId>, events: &[&str]) {
        self.record("important_error", user, events);
    }

    fn on_change_security(&self, user: Option<UserId>, events: &[&str]) {
        self.record("change_security", user, events);
    }

    fn on_use_security(&self, user: Option<UserId>, events: &[&str]) {
        self.record("use_security", user, events);
    }

    fn on_simple_event(&self, user: Option<UserId>, events: &[&str]) {
        self.record("simple", user, events);
    }
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(
        SigningKey::new(b"integration-test-signing-key-0123456789").unwrap(),
        TokenTtls::default(),
    )
}

pub fn authenticator(store: Arc<InMemoryIdentityStore>, config: AuthConfig) -> Authenticator {
    authenticator_with_hasher(store, config, Arc::new(Sha256Hasher))
}

pub fn authenticator_with_hasher(
    store: Arc<InMemoryIdentityStore>,
    config: AuthConfig,
    hasher: Arc<dyn PasswordHasher>,
) -> Authenticator {
    let codec = TokenCodec::new(
        SigningKey::new(b"integration-test-signing-key-0123456789").unwrap(),
        TokenTtls::from(&config),
    );
    Authenticator::new(config, codec, store, hasher)
}
