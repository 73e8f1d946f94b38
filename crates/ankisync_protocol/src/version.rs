//! Client version strings.
//!
//! Clients identify themselves with a `cv` string of the form
//! `client,version,platform`, e.g. `ankidesktop,2.1.15,lin::`. The version
//! part may carry a prerelease qualifier (`2.3alpha4`, `2.1rc2`), in which
//! case the numeric core is everything before the qualifier token.

use crate::error::{ProtocolError, ProtocolResult};
use std::fmt;
use std::str::FromStr;

/// Oldest desktop client that speaks this protocol.
const MIN_DESKTOP: [u32; 3] = [2, 0, 27];

/// Oldest stable Android client that speaks this protocol.
const MIN_DROID: [u32; 3] = [2, 2, 3];

/// The 2.3 Android series gained support part way through its alphas.
const DROID_PRERELEASE_SERIES: [u32; 2] = [2, 3];
const MIN_DROID_PRERELEASE_ALPHA: u32 = 4;

/// Prerelease qualifier kinds, in the order they are searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrereleaseKind {
    /// `alpha`
    Alpha,
    /// `beta`
    Beta,
    /// `rc`
    Rc,
}

impl PrereleaseKind {
    const ALL: [PrereleaseKind; 3] = [PrereleaseKind::Alpha, PrereleaseKind::Beta, PrereleaseKind::Rc];

    /// The literal token that introduces this qualifier.
    pub fn token(&self) -> &'static str {
        match self {
            PrereleaseKind::Alpha => "alpha",
            PrereleaseKind::Beta => "beta",
            PrereleaseKind::Rc => "rc",
        }
    }
}

/// A prerelease qualifier and its optional numeric suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prerelease {
    /// Which qualifier matched.
    pub kind: PrereleaseKind,
    /// Trailing digits after the qualifier, if any.
    pub number: Option<u32>,
}

/// A parsed client version: numeric core plus optional prerelease qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVersion {
    /// Numeric components, compared lexicographically.
    pub core: Vec<u32>,
    /// Prerelease qualifier, if present.
    pub prerelease: Option<Prerelease>,
}

impl ClientVersion {
    /// Parses a version string such as `2.1.3`, `2.3alpha4` or `2.1.0beta`.
    ///
    /// Any non-numeric tail after the last numeric component of the core
    /// is ignored, so `2.1.50+dev` parses as `[2, 1, 50]`.
    pub fn parse(input: &str) -> ProtocolResult<Self> {
        let input = input.trim();

        let qualifier = PrereleaseKind::ALL
            .iter()
            .filter_map(|kind| input.find(kind.token()).map(|pos| (pos, *kind)))
            .min_by_key(|(pos, _)| *pos);

        let (core_str, prerelease) = match qualifier {
            Some((pos, kind)) => {
                let rest = &input[pos + kind.token().len()..];
                let digits = &rest[rest.trim_end_matches(|c: char| c.is_ascii_digit()).len()..];
                let number = if digits.is_empty() {
                    None
                } else {
                    Some(digits.parse::<u32>().map_err(|_| {
                        ProtocolError::invalid_version(input, "prerelease number out of range")
                    })?)
                };
                (&input[..pos], Some(Prerelease { kind, number }))
            }
            None => (input, None),
        };

        let numeric_end = core_str
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(core_str.len());
        let numeric = core_str[..numeric_end].trim_end_matches('.');
        if numeric.is_empty() {
            return Err(ProtocolError::invalid_version(input, "no numeric version"));
        }

        let core = numeric
            .split('.')
            .map(str::parse::<u32>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ProtocolError::invalid_version(input, "empty or oversized component"))?;

        Ok(Self { core, prerelease })
    }

    /// Returns the prerelease number if the qualifier is of the given kind.
    pub fn prerelease_number(&self, kind: PrereleaseKind) -> Option<u32> {
        self.prerelease
            .filter(|p| p.kind == kind)
            .and_then(|p| p.number)
    }
}

impl FromStr for ClientVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.core.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))?;
        if let Some(prerelease) = &self.prerelease {
            write!(f, "{}", prerelease.kind.token())?;
            if let Some(number) = prerelease.number {
                write!(f, "{}", number)?;
            }
        }
        Ok(())
    }
}

/// A client's self description, parsed once per `meta` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDescriptor {
    /// Client family, e.g. `ankidesktop` or `ankidroid`.
    pub client: String,
    /// Parsed client version.
    pub version: ClientVersion,
    /// Platform string, if sent.
    pub platform: Option<String>,
}

impl ClientDescriptor {
    /// Parses a `client,version[,platform]` string.
    pub fn parse(cv: &str) -> ProtocolResult<Self> {
        let mut parts = cv.splitn(3, ',');
        let client = parts.next().unwrap_or_default().trim();
        if client.is_empty() {
            return Err(ProtocolError::invalid_version(cv, "missing client name"));
        }
        let version = parts
            .next()
            .ok_or_else(|| ProtocolError::invalid_version(cv, "missing client version"))?;
        let platform = parts.next().map(str::to_string);

        Ok(Self {
            client: client.to_string(),
            version: ClientVersion::parse(version)?,
            platform,
        })
    }

    /// Returns true if the client is too old to speak this protocol at all.
    ///
    /// Unknown client families are assumed current.
    pub fn is_legacy(&self) -> bool {
        let core = self.version.core.as_slice();
        match self.client.as_str() {
            "ankidesktop" => core < &MIN_DESKTOP[..],
            "ankidroid" => {
                if core == &DROID_PRERELEASE_SERIES[..] {
                    self.version
                        .prerelease_number(PrereleaseKind::Alpha)
                        .is_some_and(|alpha| alpha < MIN_DROID_PRERELEASE_ALPHA)
                } else {
                    core < &MIN_DROID[..]
                }
            }
            _ => false,
        }
    }
}
