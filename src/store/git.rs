// src/store/git.rs

//! git layer behind the store
//!
//! Commits stage the whole working copy; pulls treat the remote as
//! authoritative (fetch, then hard reset to the fetched head); a rejected
//! push is classified so the store can pull and retry exactly once.

use crate::error::{Error, Result};
use git2::{
    Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, IndexAddOption, PushOptions,
    RemoteCallbacks, Repository, ResetType,
};
use std::cell::RefCell;
use std::path::Path;
use tracing::{debug, info};

/// Branch, author, and remote binding for the working copy
#[derive(Debug, Clone)]
pub struct GitConfig {
    pub url: Option<String>,
    pub pass: Option<String>,
    pub branch: String,
    pub user: String,
    pub email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        GitConfig {
            url: None,
            pass: None,
            branch: "main".to_string(),
            user: "ntnsync".to_string(),
            email: "ntnsync@localhost".to_string(),
        }
    }
}

impl GitConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        GitConfig {
            url: config.git_url.clone(),
            pass: config.git_pass.clone(),
            branch: config.git_branch.clone(),
            user: config.git_user.clone(),
            email: config.git_email.clone(),
        }
    }
}

/// Open the repository at `root`, initializing it on the configured branch
/// if absent.
pub fn open_or_init(root: &Path, cfg: &GitConfig) -> Result<()> {
    if root.join(".git").exists() {
        Repository::open(root)?;
        return Ok(());
    }
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head(&format!("refs/heads/{}", cfg.branch));
    Repository::init_opts(root, &opts)?;
    info!(branch = %cfg.branch, "initialized git repository");
    Ok(())
}

/// Stage every change under the working copy and commit. Returns `None`
/// when the stage is empty (no-op success).
pub fn commit_all(root: &Path, cfg: &GitConfig, message: &str) -> Result<Option<git2::Oid>> {
    let repo = Repository::open(root)?;
    let mut index = repo.index()?;
    index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"], None)?;
    index.write()?;
    let tree_id = index.write_tree()?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    // Empty stage: same tree as the tip, or an empty tree on an unborn branch
    match &parent {
        Some(commit) if commit.tree_id() == tree_id => return Ok(None),
        None if repo.find_tree(tree_id)?.is_empty() => return Ok(None),
        _ => {}
    }

    let sig = git2::Signature::now(&cfg.user, &cfg.email)?;
    let tree = repo.find_tree(tree_id)?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
    debug!(commit = %oid, "created commit");
    Ok(Some(oid))
}

/// Hard reset the working copy to the branch tip, removing uncommitted
/// changes and untracked files.
pub fn hard_reset_to_head(root: &Path) -> Result<()> {
    let repo = Repository::open(root)?;
    match repo.head() {
        Ok(head) => {
            let target = head.peel(git2::ObjectType::Commit)?;
            repo.reset(&target, ResetType::Hard, None)?;
        }
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    // On an unborn branch there is nothing to check out; ignore that case
    let _ = repo.checkout_head(Some(&mut checkout));
    Ok(())
}

/// Push the configured branch to origin.
pub fn push(root: &Path, cfg: &GitConfig) -> Result<()> {
    let repo = Repository::open(root)?;
    let mut remote = find_or_create_remote(&repo, cfg)?;

    let rejection: RefCell<Option<String>> = RefCell::new(None);
    let mut callbacks = credential_callbacks(cfg);
    callbacks.push_update_reference(|refname, status| {
        if let Some(msg) = status {
            *rejection.borrow_mut() = Some(format!("{refname}: {msg}"));
        }
        Ok(())
    });

    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    let refspec = format!("refs/heads/{b}:refs/heads/{b}", b = cfg.branch);
    remote.push(&[refspec.as_str()], Some(&mut opts))?;

    if let Some(msg) = rejection.borrow_mut().take() {
        return Err(Error::Git(git2::Error::new(
            ErrorCode::NotFastForward,
            ErrorClass::Net,
            &msg,
        )));
    }
    info!(branch = %cfg.branch, "pushed");
    Ok(())
}

/// Fetch the configured branch and hard reset to the fetched head. An empty
/// remote (branch not there yet) is success.
pub fn pull(root: &Path, cfg: &GitConfig) -> Result<()> {
    let repo = Repository::open(root)?;
    let mut remote = find_or_create_remote(&repo, cfg)?;

    let mut opts = FetchOptions::new();
    opts.remote_callbacks(credential_callbacks(cfg));
    match remote.fetch(&[cfg.branch.as_str()], Some(&mut opts), None) {
        Ok(()) => {}
        Err(e) if remote_ref_missing(&e) => {
            debug!(branch = %cfg.branch, "remote branch absent, nothing to pull");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let fetch_head = match repo.find_reference("FETCH_HEAD") {
        Ok(r) => r,
        Err(_) => return Ok(()),
    };
    let fetched = repo.reference_to_annotated_commit(&fetch_head)?;
    let commit = repo.find_commit(fetched.id())?;

    let refname = format!("refs/heads/{}", cfg.branch);
    repo.reference(&refname, commit.id(), true, "pull: remote is authoritative")?;
    repo.set_head(&refname)?;
    repo.reset(commit.as_object(), ResetType::Hard, None)?;
    info!(branch = %cfg.branch, head = %commit.id(), "pulled");
    Ok(())
}

/// True for the push rejection the store recovers from via pull-and-retry.
pub fn is_non_fast_forward(err: &Error) -> bool {
    match err {
        Error::Git(e) => {
            e.code() == ErrorCode::NotFastForward
                || e.message().contains("non-fast-forward")
                || e.message().contains("fetch first")
        }
        _ => false,
    }
}

fn remote_ref_missing(e: &git2::Error) -> bool {
    // An empty remote advertises no refs; fetching the branch then fails
    // with a not-found flavor that varies across libgit2 versions
    e.code() == ErrorCode::NotFound
        || e.message().contains("couldn't find remote ref")
        || e.message().contains("not found")
}

fn find_or_create_remote<'r>(repo: &'r Repository, cfg: &GitConfig) -> Result<git2::Remote<'r>> {
    match repo.find_remote("origin") {
        Ok(remote) => Ok(remote),
        Err(_) => {
            let url = cfg.url.as_deref().ok_or_else(|| {
                Error::Config("no git remote configured (NTN_GIT_URL)".to_string())
            })?;
            Ok(repo.remote("origin", url)?)
        }
    }
}

fn credential_callbacks(cfg: &GitConfig) -> RemoteCallbacks<'static> {
    let user = cfg.user.clone();
    let pass = cfg.pass.clone();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        if let Some(pass) = &pass
            && allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
        {
            let username = username_from_url.unwrap_or(&user);
            return Cred::userpass_plaintext(username, pass);
        }
        if allowed.contains(CredentialType::SSH_KEY)
            && let Some(username) = username_from_url
        {
            return Cred::ssh_key_from_agent(username);
        }
        Cred::default()
    });
    callbacks
}
