use anyhow::{anyhow, Context as AnyhowContext, Result};
use git2::Repository;
use log::{debug, info};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;

static GITHUB_REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(www\.)?github\.com/(?P<owner>[A-Za-z0-9_.-]+)/(?P<repo>[A-Za-z0-9_.-]+?)(\.git)?/?$",
    )
    .expect("valid GitHub URL pattern")
});

/// Whether `url` points at a GitHub repository (`https://github.com/<owner>/<repo>`).
pub fn is_github_repo_url(url: &str) -> bool {
    let Some(captures) = GITHUB_REPO_URL.captures(url.trim()) else {
        return false;
    };
    // `.` and `..` are path segments, not names
    let is_name = |segment: &str| !segment.chars().all(|c| c == '.');
    is_name(&captures["owner"]) && is_name(&captures["repo"])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoMetadata {
    pub repo_name: String,
    pub commit_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
}

/// Clone `url` into `dest`.
pub fn clone_repo(url: &str, dest: &Path) -> Result<Repository> {
    info!("Cloning repository from {}...", url);
    let repo = Repository::clone(url, dest)
        .with_context(|| format!("Failed to clone repository {}", url))?;
    info!("Repository cloned successfully.");
    Ok(repo)
}

/// Head commit and repository name of the checkout at `path`.
pub fn repo_metadata(path: &Path) -> Result<RepoMetadata> {
    let repo = Repository::open(path).context("Failed to open git repository")?;
    let commit_hash = repo
        .head()
        .context("Repository has no HEAD")?
        .peel_to_commit()
        .context("HEAD does not point at a commit")?
        .id()
        .to_string();

    let origin_url = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(str::to_string));
    let repo_name = match &origin_url {
        Some(url) => repo_name_from_url(url),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Cannot determine repository name"))?,
    };

    debug!("Repository {} at {}", repo_name, commit_hash);
    Ok(RepoMetadata {
        repo_name,
        commit_hash,
        repo_url: origin_url,
    })
}

pub fn repo_name_from_url(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}
