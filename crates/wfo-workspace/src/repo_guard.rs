// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use git2::{CredentialType, FetchOptions, RemoteCallbacks, Repository};

/// `git2::Repository` holds raw libgit2 pointers and is `!Send + !Sync`.
/// All access goes through a `Mutex<RepoGuard>`, so it is safe to share
/// across the tasks that hand out and release workspaces.
pub(crate) struct RepoGuard(pub Repository);

// SAFETY: access is serialised through the Mutex in WorkspaceManager.
unsafe impl Send for RepoGuard {}
unsafe impl Sync for RepoGuard {}

/// Credential chain: SSH agent, then key files under `~/.ssh`, then the
/// libgit2 default (covers anonymous HTTPS clones).
pub(crate) fn auth_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut cbs = RemoteCallbacks::new();
    let mut attempts = 0u8;
    cbs.credentials(move |_url, username, allowed| {
        attempts += 1;
        if attempts > 5 {
            return Err(git2::Error::from_str("too many auth attempts"));
        }
        let user = username.unwrap_or("git");
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Ok(c) = git2::Cred::ssh_key_from_agent(user) {
                return Ok(c);
            }
            let home = std::env::var("HOME").unwrap_or_default();
            for name in &["id_ed25519", "id_rsa", "id_ecdsa"] {
                let key = std::path::PathBuf::from(&home).join(".ssh").join(name);
                if key.exists() {
                    if let Ok(c) = git2::Cred::ssh_key(user, None, &key, None) {
                        return Ok(c);
                    }
                }
            }
        }
        if allowed.contains(CredentialType::DEFAULT) {
            return git2::Cred::default();
        }
        Err(git2::Error::from_str("no suitable credentials"))
    });
    cbs
}

pub(crate) fn fetch_opts<'a>() -> FetchOptions<'a> {
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(auth_callbacks());
    opts
}
