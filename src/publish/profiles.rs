use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::utils::{ensure_dir, slugify};

const REGISTRY_FILE: &str = "profiles.json";
const EXPIRY_MARGIN: Duration = Duration::seconds(60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl StoredToken {
    /// Usable for at least another minute.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at - EXPIRY_MARGIN > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }
}

/// Obtains and renews credentials for a profile.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Interactive authorization from scratch.
    async fn authorize(&self, profile: &str) -> Result<StoredToken, AuthError>;

    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken, AuthError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStatus {
    pub name: String,
    pub token_file: PathBuf,
    pub has_token: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    profiles: BTreeMap<String, String>,
}

/// `profiles.json` in the tokens directory: profile name → token file name.
pub struct ProfileRegistry {
    dir: PathBuf,
    entries: BTreeMap<String, String>,
}

impl ProfileRegistry {
    pub fn open(dir: &Path) -> Result<Self, AuthError> {
        let path = dir.join(REGISTRY_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str::<RegistryFile>(&text)?.profiles,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            entries,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn token_path(&self, name: &str) -> Option<PathBuf> {
        self.entries.get(name).map(|file| self.dir.join(file))
    }

    /// Token path for `name`, registering the profile first if needed.
    pub fn ensure(&mut self, name: &str) -> Result<PathBuf, AuthError> {
        if let Some(path) = self.token_path(name) {
            return Ok(path);
        }
        let base = match slugify(name) {
            slug if slug.is_empty() => "profile".to_string(),
            slug => slug,
        };
        let taken = |file: &str| self.entries.values().any(|existing| existing == file);
        let mut file = format!("token_{base}.json");
        let mut n = 2;
        while taken(&file) {
            file = format!("token_{base}-{n}.json");
            n += 1;
        }
        self.entries.insert(name.to_string(), file.clone());
        self.save()?;
        info!(profile = name, file = %file, "profile registered");
        Ok(self.dir.join(file))
    }

    /// Drops the stored token, keeping the registration. Returns whether a
    /// token file existed.
    pub fn invalidate(&self, name: &str) -> Result<bool, AuthError> {
        let Some(path) = self.token_path(name) else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn list(&self) -> Vec<ProfileStatus> {
        self.entries
            .iter()
            .map(|(name, file)| {
                let token_file = self.dir.join(file);
                ProfileStatus {
                    name: name.clone(),
                    has_token: token_file.is_file(),
                    token_file,
                }
            })
            .collect()
    }

    fn save(&self) -> Result<(), AuthError> {
        let payload = RegistryFile {
            profiles: self.entries.clone(),
        };
        write_atomic(
            &self.dir.join(REGISTRY_FILE),
            serde_json::to_string_pretty(&payload)?.as_bytes(),
        )
    }
}

/// A token that cannot be read or parsed counts as absent.
pub fn load_token(path: &Path) -> Option<StoredToken> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "token unreadable");
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(token) => Some(token),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "token corrupt, ignoring");
            None
        }
    }
}

pub fn save_token(path: &Path, token: &StoredToken) -> Result<(), AuthError> {
    write_atomic(path, serde_json::to_string_pretty(token)?.as_bytes())
}

/// Writes through a sibling temp file so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AuthError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| AuthError::Io(err.error))?;
    Ok(())
}

pub struct ProfileManager<B: CredentialBroker> {
    registry: ProfileRegistry,
    broker: B,
    cache: HashMap<String, StoredToken>,
}

impl<B: CredentialBroker> ProfileManager<B> {
    pub fn open(tokens_dir: &Path, broker: B) -> Result<Self, AuthError> {
        Ok(Self {
            registry: ProfileRegistry::open(tokens_dir)?,
            broker,
            cache: HashMap::new(),
        })
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// A token for `name` that is valid for at least another minute: from
    /// memory, from disk, by refreshing, or finally by interactive
    /// authorization.
    pub async fn authenticate(&mut self, name: &str) -> Result<StoredToken, AuthError> {
        if let Some(token) = self.cache.get(name).filter(|t| t.is_valid()) {
            return Ok(token.clone());
        }

        let path = self.registry.ensure(name)?;
        let stored = load_token(&path);

        if let Some(token) = stored.as_ref().filter(|t| t.is_valid()) {
            info!(profile = name, "using stored token");
            self.cache.insert(name.to_string(), token.clone());
            return Ok(token.clone());
        }

        if let Some(token) = stored {
            if let Some(fresh) = self.try_refresh(name, &path, &token).await? {
                return Ok(fresh);
            }
        }

        self.authorize(name, &path).await
    }

    /// Replaces a token the server rejected even though it looked valid:
    /// refresh when possible, otherwise authorize again.
    pub async fn renew(&mut self, name: &str) -> Result<StoredToken, AuthError> {
        let path = self.registry.ensure(name)?;
        let current = self.cache.remove(name).or_else(|| load_token(&path));
        if let Some(token) = current {
            if let Some(fresh) = self.try_refresh(name, &path, &token).await? {
                return Ok(fresh);
            }
        }
        self.authorize(name, &path).await
    }

    /// `None` when the token has no refresh token or the refresh was refused.
    async fn try_refresh(
        &mut self,
        name: &str,
        path: &Path,
        token: &StoredToken,
    ) -> Result<Option<StoredToken>, AuthError> {
        if token.refresh_token.is_none() {
            return Ok(None);
        }
        match self.broker.refresh(token).await {
            Ok(mut fresh) => {
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = token.refresh_token.clone();
                }
                save_token(path, &fresh)?;
                info!(profile = name, "token refreshed");
                self.cache.insert(name.to_string(), fresh.clone());
                Ok(Some(fresh))
            }
            Err(err) => {
                warn!(profile = name, error = %err, "refresh failed, reauthorizing");
                Ok(None)
            }
        }
    }

    async fn authorize(&mut self, name: &str, path: &Path) -> Result<StoredToken, AuthError> {
        info!(profile = name, "authorization required");
        let token = self.broker.authorize(name).await?;
        save_token(path, &token)?;
        self.cache.insert(name.to_string(), token.clone());
        Ok(token)
    }

    pub async fn force_reauthenticate(&mut self, name: &str) -> Result<StoredToken, AuthError> {
        if self.registry.invalidate(name)? {
            info!(profile = name, "stored token removed");
        }
        self.cache.remove(name);
        self.authenticate(name).await
    }

    pub fn list_profiles(&self) -> Vec<ProfileStatus> {
        self.registry.list()
    }
}

/// Bearer tokens for clients whose work can outlast a single access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token that is currently valid.
    async fn access_token(&self) -> Result<String, AuthError>;

    /// A replacement after the server rejected the current token.
    async fn renew(&self) -> Result<String, AuthError>;
}

/// One token, never renewed.
pub struct FixedToken(pub String);

#[async_trait]
impl TokenSource for FixedToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }

    async fn renew(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Tokens for one profile, refreshed through its manager as they expire.
pub struct ProfileSession<B: CredentialBroker> {
    manager: Mutex<ProfileManager<B>>,
    profile: String,
}

impl<B: CredentialBroker> ProfileSession<B> {
    pub fn new(manager: ProfileManager<B>, profile: &str) -> Self {
        Self {
            manager: Mutex::new(manager),
            profile: profile.to_string(),
        }
    }
}

#[async_trait]
impl<B: CredentialBroker> TokenSource for ProfileSession<B> {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut manager = self.manager.lock().await;
        Ok(manager.authenticate(&self.profile).await?.access_token)
    }

    async fn renew(&self) -> Result<String, AuthError> {
        let mut manager = self.manager.lock().await;
        Ok(manager.renew(&self.profile).await?.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBroker {
        authorized: AtomicUsize,
        refreshed: AtomicUsize,
        refresh_works: bool,
    }

    impl FakeBroker {
        fn new(refresh_works: bool) -> Self {
            Self {
                authorized: AtomicUsize::new(0),
                refreshed: AtomicUsize::new(0),
                refresh_works,
            }
        }
    }

    fn token(access: &str, refresh: Option<&str>, valid_for: Duration) -> StoredToken {
        StoredToken {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at: OffsetDateTime::now_utc() + valid_for,
            scopes: vec!["youtube.upload".into()],
        }
    }

    #[async_trait]
    impl CredentialBroker for FakeBroker {
        async fn authorize(&self, profile: &str) -> Result<StoredToken, AuthError> {
            let n = self.authorized.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(token(
                &format!("auth-{profile}-{n}"),
                Some("r1"),
                Duration::hours(1),
            ))
        }

        async fn refresh(&self, _token: &StoredToken) -> Result<StoredToken, AuthError> {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
            if self.refresh_works {
                Ok(token("refreshed", None, Duration::hours(1)))
            } else {
                Err(AuthError::Denied("invalid_grant".into()))
            }
        }
    }

    #[test]
    fn validity_keeps_a_one_minute_margin() {
        let now = OffsetDateTime::now_utc();
        let mut t = token("a", None, Duration::ZERO);
        t.expires_at = now + Duration::seconds(61);
        assert!(t.is_valid_at(now));
        t.expires_at = now + Duration::seconds(59);
        assert!(!t.is_valid_at(now));
    }

    #[test]
    fn registry_assigns_distinct_token_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ProfileRegistry::open(dir.path()).unwrap();
        let a = registry.ensure("My Channel").unwrap();
        let b = registry.ensure("My/Channel").unwrap();
        assert_eq!(a, dir.path().join("token_My-Channel.json"));
        assert_eq!(b, dir.path().join("token_My-Channel-2.json"));
        assert_eq!(registry.ensure("My Channel").unwrap(), a);

        let reopened = ProfileRegistry::open(dir.path()).unwrap();
        assert_eq!(reopened.token_path("My/Channel"), Some(b));
    }

    #[tokio::test]
    async fn first_use_authorizes_then_reuses_disk_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        let first = manager.authenticate("main").await.unwrap();
        assert_eq!(first.access_token, "auth-main-1");
        assert_eq!(manager.broker().authorized.load(Ordering::SeqCst), 1);

        let mut fresh = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        let again = fresh.authenticate("main").await.unwrap();
        assert_eq!(again, first);
        assert_eq!(fresh.broker().authorized.load(Ordering::SeqCst), 0);

        let listed = fresh.list_profiles();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].has_token);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_keeps_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        let path = manager.registry.ensure("alt").unwrap();
        save_token(&path, &token("old", Some("keep-me"), Duration::seconds(-10))).unwrap();

        let token = manager.authenticate("alt").await.unwrap();
        assert_eq!(token.access_token, "refreshed");
        assert_eq!(token.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(manager.broker().refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.broker().authorized.load(Ordering::SeqCst), 0);
        assert_eq!(load_token(&path), Some(token));
    }

    #[tokio::test]
    async fn failed_refresh_falls_through_to_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(false)).unwrap();
        let path = manager.registry.ensure("alt").unwrap();
        save_token(&path, &token("old", Some("r"), Duration::seconds(-10))).unwrap();

        let token = manager.authenticate("alt").await.unwrap();
        assert_eq!(token.access_token, "auth-alt-1");
        assert_eq!(manager.broker().refreshed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_token_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        let path = manager.registry.ensure("main").unwrap();
        fs::write(&path, b"{\"access_token\": ").unwrap();

        let token = manager.authenticate("main").await.unwrap();
        assert_eq!(token.access_token, "auth-main-1");
        assert_eq!(load_token(&path), Some(token));
    }

    #[tokio::test]
    async fn force_reauthenticate_discards_cached_and_stored_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        manager.authenticate("main").await.unwrap();
        let token = manager.force_reauthenticate("main").await.unwrap();
        assert_eq!(token.access_token, "auth-main-2");
        assert_eq!(manager.broker().authorized.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_token_is_renewed_by_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        manager.authenticate("main").await.unwrap();

        let token = manager.renew("main").await.unwrap();
        assert_eq!(token.access_token, "refreshed");
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));
        assert_eq!(manager.broker().refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.broker().authorized.load(Ordering::SeqCst), 1);
        assert_eq!(manager.authenticate("main").await.unwrap(), token);
    }

    #[tokio::test]
    async fn renew_without_refresh_token_authorizes_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        let path = manager.registry.ensure("main").unwrap();
        save_token(&path, &token("bare", None, Duration::hours(1))).unwrap();

        let token = manager.renew("main").await.unwrap();
        assert_eq!(token.access_token, "auth-main-1");
        assert_eq!(manager.broker().refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_refreshes_an_expired_token_between_uses() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProfileManager::open(dir.path(), FakeBroker::new(true)).unwrap();
        manager.authenticate("main").await.unwrap();
        let session = ProfileSession::new(manager, "main");
        assert_eq!(session.access_token().await.unwrap(), "auth-main-1");

        // The first token runs out while the session is in use.
        {
            let mut manager = session.manager.lock().await;
            let path = manager.registry.ensure("main").unwrap();
            let expired = token("auth-main-1", Some("r1"), Duration::seconds(-5));
            save_token(&path, &expired).unwrap();
            manager.cache.insert("main".into(), expired);
        }

        assert_eq!(session.access_token().await.unwrap(), "refreshed");
        assert_eq!(session.renew().await.unwrap(), "refreshed");
        let manager = session.manager.lock().await;
        assert_eq!(manager.broker().authorized.load(Ordering::SeqCst), 1);
        assert_eq!(manager.broker().refreshed.load(Ordering::SeqCst), 2);
    }
}
