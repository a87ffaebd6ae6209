//! Clone-then-reset-hard-to-a-ref, the primitive the Git sub-resolver
//! (`module_resolver::git_resolver`) builds on: `git2::Repository::revparse_single`
//! resolves a branch, tag, commit, or semver tag identically once the
//! matching ref has been fetched, so the same routine serves all four.

use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::ErrorCode::Auth;
use git2::ResetType::Hard;
use git2::{
    AutotagOption, CertificateCheckStatus, Cred, CredentialType, Error, FetchOptions, Object, RemoteCallbacks,
    Repository, SubmoduleUpdateOptions,
};
use url::Url;

pub fn clone_at_commit<P>(
    repository_url: &Url,
    commit_id: &str,
    into_dir: P,
    get_credentials: &impl Fn(&str) -> Vec<(CredentialType, Cred)>,
) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    let repo = fetch(repository_url, into_dir, get_credentials, commit_id)?;

    let _ = checkout(&repo, commit_id)?;

    let submodules = repo.submodules()?;
    if !submodules.is_empty() {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(authentication_callback(&get_credentials));
        callbacks.certificate_check(|_, _| Ok(CertificateCheckStatus::CertificateOk));

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(callbacks);
        let mut opts = SubmoduleUpdateOptions::new();
        opts.fetch(fo);

        for mut submodule in submodules {
            info!("getting submodule {:?} from {:?}", submodule.name(), submodule.url());
            submodule.update(true, Some(&mut opts))?
        }
    }

    Ok(())
}

/// The credentials callback is called endlessly until the server returns
/// Auth Ok or a definitive error: if auth is denied, it is up to us to
/// return a new credential to try a different method, or an error once
/// everything has been exhausted.
fn authentication_callback(
    get_credentials: &impl Fn(&str) -> Vec<(CredentialType, Cred)>,
) -> impl FnMut(&str, Option<&str>, CredentialType) -> Result<Cred, Error> + '_ {
    let mut current_credentials: (String, Vec<(CredentialType, Cred)>) = ("".into(), vec![]);

    move |remote_url, username_from_url, allowed_types| {
        if remote_url != current_credentials.0 {
            current_credentials = (remote_url.to_string(), get_credentials(username_from_url.unwrap_or("git")));
        }
        let auth_methods = &mut current_credentials.1;

        loop {
            let (cred_type, credential) = match auth_methods.pop() {
                Some(cred) => cred,
                None => {
                    let msg = format!("exhausted all available auth methods fetching repository {remote_url}");
                    let mut error = Error::from_str(msg.as_str());
                    error.set_code(Auth);
                    return Err(error);
                }
            };

            if allowed_types.contains(cred_type) {
                return Ok(credential);
            }
        }
    }
}

fn checkout<'a>(repo: &'a Repository, commit_id: &'a str) -> Result<Object<'a>, Error> {
    let obj = repo.revparse_single(commit_id).map_err(|err| {
        let repo_url = repo
            .find_remote("origin")
            .map(|remote| remote.url().unwrap_or_default().to_string())
            .unwrap_or_default();
        let msg = format!("unable to resolve git ref {} on repository {}: {}", &commit_id, &repo_url, &err);
        Error::from_str(&msg)
    })?;

    let mut checkout_opts = CheckoutBuilder::new();
    checkout_opts.force().remove_ignored(true).remove_untracked(true);

    repo.reset(&obj, Hard, Some(&mut checkout_opts))?;
    Ok(obj)
}

fn fetch<P>(
    repository_url: &Url,
    into_dir: P,
    get_credentials: &impl Fn(&str) -> Vec<(CredentialType, Cred)>,
    commit_id: &str,
) -> Result<Repository, Error>
where
    P: AsRef<Path>,
{
    if repository_url.scheme() != "https" {
        return Err(Error::from_str("repository url must start with https://"));
    }

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(authentication_callback(&get_credentials));

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(callbacks);
    fo.depth(1);
    fo.update_fetchhead(false);
    fo.download_tags(AutotagOption::None);

    if into_dir.as_ref().exists() {
        let _ = std::fs::remove_dir_all(into_dir.as_ref());
    }

    let repo = Repository::init(into_dir)?;
    remote_fetch(repository_url, &commit_id, &mut fo, &repo)?;

    Ok(repo)
}

fn remote_fetch(repository_url: &Url, commit_id: &&str, mut fo: &mut FetchOptions, repo: &Repository) -> Result<(), Error> {
    let mut remote = repo.remote("origin", repository_url.as_str())?;
    remote.fetch(&[commit_id], Some(&mut fo), None)?;
    remote.disconnect()?;
    Ok(())
}
