use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// `major.minor.patch`; a missing patch reads as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Version of this crate.
    pub fn current() -> Self {
        Self::new(
            env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        )
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| {
                p.parse::<u32>()
                    .map_err(|_| Error::InvalidConfig(format!("version `{}` is not numeric", s)))
            })
            .collect::<Result<Vec<_>>>()?;

        match parts[..] {
            [major, minor] => Ok(Self::new(major, minor, 0)),
            [major, minor, patch] => Ok(Self::new(major, minor, patch)),
            _ => Err(Error::InvalidConfig(format!(
                "version `{}` needs two or three parts",
                s
            ))),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether `a` is strictly newer than `b`.
pub fn newer_than_version(a: &str, b: &str) -> Result<bool> {
    let a: Version = a.parse()?;
    let b: Version = b.parse()?;

    Ok(a.cmp(&b) == Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_is_padded() {
        assert_eq!("0.9".parse::<Version>().unwrap(), Version::new(0, 9, 0));
        assert!(!newer_than_version("0.9", "0.9.0").unwrap());
        assert!(newer_than_version("0.10", "0.9.7").unwrap());
        assert!(newer_than_version("1.0.1", "1.0").unwrap());
        assert!(!newer_than_version("0.8.3", "0.9").unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!("1".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!(newer_than_version("1.x", "1.0").is_err());
    }
}
