use std::fmt;

use tokio::process::Command;
use tracing::debug;

const TOKEN_VARIABLES: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment(&'static str),
    GhCli,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment(name) => write!(f, "${name}"),
            CredentialSource::GhCli => f.write_str("gh auth token"),
        }
    }
}

/// A bearer token, looked up once per run and handed to the api client.
#[derive(Clone)]
pub struct Credential {
    token: String,
    pub source: CredentialSource,
}

impl Credential {
    pub fn new(token: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            token: token.into(),
            source,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

// never print the token itself
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Looks at the environment first, then asks the `gh` cli.
pub async fn discover() -> Option<Credential> {
    if let Some(credential) = from_env(|name| std::env::var(name).ok()) {
        return Some(credential);
    }

    from_gh_cli().await
}

fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Credential> {
    TOKEN_VARIABLES.iter().find_map(|&name| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|token| Credential::new(token, CredentialSource::Environment(name)))
    })
}

async fn from_gh_cli() -> Option<Credential> {
    let output = match Command::new("gh").args(["auth", "token"]).output().await {
        Ok(output) => output,
        Err(e) => {
            debug!("gh cli not available: {e}");
            return None;
        }
    };

    if !output.status.success() {
        debug!("gh auth token exited with {}", output.status);
        return None;
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!token.is_empty()).then(|| Credential::new(token, CredentialSource::GhCli))
}
