use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Error, Result, bail};
use pep440_rs::{Version, VersionSpecifiers};
use reqwest::Url;

const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// A Python package name, normalized for comparison: lowercase, with every run of `-`, `_` and
/// `.` replaced by a single `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageName(String);

impl FromStr for PackageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid = s.starts_with(|c: char| c.is_ascii_alphanumeric())
            && s.ends_with(|c: char| c.is_ascii_alphanumeric())
            && s.chars().all(is_name_char);
        if !valid {
            bail!("invalid package name {s:?}");
        }

        let mut normalized = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_ascii_alphanumeric() {
                normalized.push(c.to_ascii_lowercase());
            } else if !normalized.ends_with('-') {
                normalized.push('-');
            }
        }
        Ok(Self(normalized))
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A package name with an optional version constraint, like `requests>=2,<3`.
#[derive(Debug, Clone)]
pub struct Requirement {
    name: PackageName,
    specifiers: Option<VersionSpecifiers>,
}

impl Requirement {
    pub const fn name(&self) -> &PackageName {
        &self.name
    }

    pub fn allows(&self, version: &Version) -> bool {
        self.specifiers
            .as_ref()
            .is_none_or(|specifiers| specifiers.contains(version))
    }
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let end = s.find(|c: char| !is_name_char(c)).unwrap_or(s.len());
        let name = s[..end].trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
        let rest = s[name.len()..].trim();

        let specifiers = if rest.is_empty() {
            None
        } else {
            Some(
                VersionSpecifiers::from_str(rest)
                    .with_context(|| format!("could not parse version from {rest:?}"))?,
            )
        };
        Ok(Self {
            name: name.parse()?,
            specifiers,
        })
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)?;
        if let Some(specifiers) = &self.specifiers {
            specifiers.fmt(f)?;
        }
        Ok(())
    }
}

/// The parts of a wheel filename we care about: `{name}-{version}(-{build})?-{tags}.whl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub name: PackageName,
    pub version: Version,
}

impl FromStr for WheelFilename {
    type Err = Error;

    fn from_str(filename: &str) -> Result<Self> {
        let stem = filename
            .strip_suffix(".whl")
            .with_context(|| format!("{filename:?} is not a wheel"))?;
        let &[name, version, _tags] = stem.splitn(3, '-').collect::<Vec<_>>().as_slice() else {
            bail!("invalid wheel filename {filename:?}");
        };
        Ok(Self {
            name: name.parse()?,
            version: version.parse()?,
        })
    }
}

/// Where to find a wheel.
#[derive(Debug, Clone)]
pub enum Location {
    /// Resolved against the package index.
    Requirement(Requirement),
    /// Fetched lazily from this URL.
    Url(Url),
    /// Read from the local filesystem.
    Path(PathBuf),
}

impl Location {
    /// A name for the output: the normalized package name where one can be told.
    pub fn package_name(&self) -> String {
        let filename = match self {
            Self::Requirement(requirement) => return requirement.name().to_string(),
            Self::Url(url) => url
                .path_segments()
                .and_then(Iterator::last)
                .unwrap_or_default()
                .to_owned(),
            Self::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        WheelFilename::from_str(&filename).map_or(filename, |wheel| wheel.name.to_string())
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Self::Url(s.parse()?));
        }
        if s.ends_with(".whl") || Path::new(s).is_file() {
            return Ok(Self::Path(PathBuf::from(s)));
        }
        Ok(Self::Requirement(s.parse()?))
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requirement(requirement) => requirement.fmt(f),
            Self::Url(url) => url.fmt(f),
            Self::Path(path) => path.display().fmt(f),
        }
    }
}
