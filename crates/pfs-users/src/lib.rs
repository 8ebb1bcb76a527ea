#![forbid(unsafe_code)]
//! Per-user filesystem composition.
//!
//! Every configured user (and the reserved `guest`) gets a private virtual
//! namespace: a read-only in-memory root holding a welcome file, with one
//! mount per readable pool at `/<pool>`, wrapped read-only unless the user's
//! effective permission grants write. The registry also gates logins,
//! combining the credential predicate with guest policy.

use std::collections::HashMap;
use std::sync::Arc;

use pfs_auth::{ssh_key, AuthError};
use pfs_backend::{BasePathBackend, MemBackend, ReadOnlyBackend, SharedBackend};
use pfs_config::{Config, GUEST_USER};
use pfs_error::VfsError;
use pfs_vfs::MountFs;

/// A principal together with its composed filesystem.
#[derive(Clone)]
pub struct AuthFs {
    pub user: String,
    pub fs: MountFs,
}

/// All per-user filesystems, composed once at startup.
pub struct UserRegistry {
    config: Config,
    users: HashMap<String, MountFs>,
}

impl UserRegistry {
    /// Compose the filesystems for every user in `config`. Pool backends are
    /// shared between users; the read-only wrapping is per user.
    pub fn new(config: Config) -> Result<Self, VfsError> {
        let mut pools: HashMap<String, SharedBackend> = HashMap::new();
        for (name, pool) in &config.pools {
            pools.insert(
                name.clone(),
                Arc::new(BasePathBackend::host(pool.path.clone())),
            );
        }

        let mut users = HashMap::new();
        for user_name in config.users.keys() {
            let base = MemBackend::new();
            base.write_file("/README.txt", format!("Welcome, {user_name}!").as_bytes())?;
            let root = MountFs::new(Some(
                Arc::new(ReadOnlyBackend::new(Arc::new(base))) as SharedBackend
            ));

            for (pool_name, backend) in &pools {
                let perm = config.pools[pool_name].effective_perm(user_name);
                if !perm.is_read() {
                    continue;
                }
                let target: SharedBackend = if perm.is_write() {
                    backend.clone()
                } else {
                    Arc::new(ReadOnlyBackend::new(backend.clone()))
                };
                root.mount(&format!("/{pool_name}"), target)?;
            }
            tracing::debug!(user = %user_name, "composed user filesystem");
            users.insert(user_name.clone(), root);
        }
        Ok(Self { config, users })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The composed filesystem for `user`, if configured.
    #[must_use]
    pub fn user_fs(&self, user: &str) -> Option<MountFs> {
        self.users.get(user).cloned()
    }

    #[must_use]
    pub fn user_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.keys().cloned().collect();
        names.sort();
        names
    }

    /// Authenticate and hand out the user's filesystem.
    ///
    /// `guest` never carries credentials and is admitted only when the
    /// caller opted in. Everyone else must present a password or key that
    /// verifies against the user table.
    pub fn login(
        &self,
        username: &str,
        password: Option<&str>,
        public_key: Option<&ssh_key::PublicKey>,
        guest_ok: bool,
    ) -> Result<AuthFs, AuthError> {
        if username == GUEST_USER {
            if !guest_ok {
                return Err(AuthError::PermissionDenied("guest not allowed".to_owned()));
            }
            return self.auth_fs(GUEST_USER);
        }

        let password = password.filter(|presented| !presented.is_empty());
        if password.is_none() && public_key.is_none() {
            return Err(AuthError::PermissionDenied(
                "no password or public key".to_owned(),
            ));
        }

        let user = self.config.users.get(username).ok_or_else(|| {
            AuthError::NotAuthorized(format!("user {username} not found"))
        })?;

        if let Some(presented) = password {
            if !pfs_auth::verify_password(&user.password, presented) {
                return Err(AuthError::NotAuthorized(format!(
                    "user {username} password not allowed"
                )));
            }
        }

        if let Some(presented) = public_key {
            if !pfs_auth::verify_public_key(&user.public_keys, presented)? {
                return Err(AuthError::NotAuthorized(format!(
                    "user {username} public key not allowed"
                )));
            }
        }

        self.auth_fs(username)
    }

    fn auth_fs(&self, username: &str) -> Result<AuthFs, AuthError> {
        let fs = self
            .users
            .get(username)
            .ok_or_else(|| AuthError::NotAuthorized(format!("user {username} not found")))?;
        Ok(AuthFs {
            user: username.to_owned(),
            fs: fs.clone(),
        })
    }
}
