use regex::Regex;

use crate::error::FetchError;

lazy_static::lazy_static! {
    static ref REGEX_GITHUB_URL: Regex =
        Regex::new(r"^(?:https?://)?(?:www\.)?github\.com/(.*)$").unwrap();
    static ref REGEX_NAME: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap();
}

const HOST_PREFIX: &str = "https://github.com/";

/// A directory inside a repository at a given ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub owner: String,
    pub repository: String,
    pub reference: String,
    pub path: String,
}

impl Location {
    /// `owner/repository`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }
}

/// Parses either `owner/repo/tree/ref/path` or a full github.com url.
pub fn resolve(raw: &str) -> Result<Location, FetchError> {
    let invalid = |reason| FetchError::InvalidLocation {
        input: raw.to_string(),
        reason,
    };

    let trimmed = raw.trim();
    let normalized = if REGEX_GITHUB_URL.is_match(trimmed) {
        trimmed.to_string()
    } else if trimmed.contains("://") {
        return Err(invalid("only github.com urls are supported"));
    } else {
        format!("{HOST_PREFIX}{}", trimmed.trim_start_matches('/'))
    };

    let rest = REGEX_GITHUB_URL
        .captures(&normalized)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| invalid("not a github.com url"))?;

    // query string and fragment carry nothing we need
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    let (owner, repository, reference, path) = match segments.as_slice() {
        [owner, repository, _marker, reference, path @ ..] if !path.is_empty() => {
            (*owner, *repository, *reference, path)
        }
        _ => return Err(invalid("expected owner/repository/tree/ref/path")),
    };

    if !REGEX_NAME.is_match(owner) || !REGEX_NAME.is_match(repository) {
        return Err(invalid("owner and repository may only contain [A-Za-z0-9_.-]"));
    }

    // browsers percent-encode spaces and non-ascii names in tree urls
    let decode = |segment: &str| {
        urlencoding::decode(segment)
            .map(|decoded| decoded.into_owned())
            .map_err(|_| invalid("url is not valid UTF-8 once decoded"))
    };
    let reference = decode(reference)?;
    let path = path
        .iter()
        .map(|segment| decode(*segment))
        .collect::<Result<Vec<_>, _>>()?;

    // same rule as for ref paths: a directory link never needs to climb upwards
    if path
        .iter()
        .any(|segment| segment == ".." || segment == "." || segment.contains('/'))
    {
        return Err(invalid(
            "path must not contain '.' or '..' segments or an encoded '/'",
        ));
    }

    Ok(Location {
        owner: owner.to_string(),
        repository: repository.to_string(),
        reference,
        path: path.join("/"),
    })
}
