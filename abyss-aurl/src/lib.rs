// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Abyss URLs ("AURLs") identify a remote peer endpoint together with an optional
//! world path hosted by that peer.
//!
//! Supported textual forms:
//!
//! ```text
//! abyss:abc:9.8.7.6:1605/somepath
//! abyss:abc:[2001:db8:85a3:8d3:1319:8a2e:370:7348]:443|9.8.7.6:1605/somepath
//! abyss:abc/somepath
//! abyss:abc:9.8.7.6:1605
//! abyss:abc
//! ```
//!
//! The hash is the stable identity of the peer; the address candidates are dial
//! targets tried in order; the path selects a world on that peer (defaulting to
//! `/`).

#![deny(missing_docs)]

use std::{fmt, net::SocketAddr, str::FromStr};

use thiserror::Error;

/// The protocol scheme of an [`Aurl`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// The AHMP control protocol.
    Abyss,
    /// The HTTP/3 object transfer protocol.
    Abyst,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Abyss => write!(f, "abyss"),
            Scheme::Abyst => write!(f, "abyst"),
        }
    }
}

/// A parsed Abyss URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aurl {
    scheme: Scheme,
    hash: String,
    addresses: Vec<SocketAddr>,
    path: String,
}

impl Aurl {
    /// Creates an AURL from its parts. An empty path is normalized to `/`.
    pub fn new(scheme: Scheme, hash: impl Into<String>, addresses: Vec<SocketAddr>, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if path.is_empty() {
            path.push('/');
        }

        Self {
            scheme,
            hash: hash.into(),
            addresses,
            path,
        }
    }

    /// Returns the scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the peer identity hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Returns the dial address candidates.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Returns the world path (always starting with `/`).
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Aurl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addresses.is_empty() {
            return write!(f, "{}:{}{}", self.scheme, self.hash, self.path);
        }

        write!(f, "{}:{}:", self.scheme, self.hash)?;
        for (i, addr) in self.addresses.iter().enumerate() {
            if i != 0 {
                write!(f, "|")?;
            }
            write!(f, "{}", addr)?;
        }
        write!(f, "{}", self.path)
    }
}

/// Errors produced when parsing an [`Aurl`] from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AurlParseError {
    /// The scheme prefix was neither `abyss:` nor `abyst:`.
    #[error("unsupported scheme")]
    UnsupportedScheme,
    /// The peer hash between scheme and first separator was empty.
    #[error("missing peer hash")]
    MissingHash,
    /// An address candidate did not parse as a socket address with a non-zero port.
    #[error("invalid address candidate `{0}`")]
    InvalidAddress(String),
}

impl FromStr for Aurl {
    type Err = AurlParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, body) = if let Some(body) = raw.strip_prefix("abyss:") {
            (Scheme::Abyss, body)
        } else if let Some(body) = raw.strip_prefix("abyst:") {
            (Scheme::Abyst, body)
        } else {
            return Err(AurlParseError::UnsupportedScheme);
        };

        // Tolerated for authority-style spellings.
        let body = body.strip_prefix("//").unwrap_or(body);

        let Some(hash_end) = body.find([':', '/']) else {
            // No candidates, no path.
            if body.is_empty() {
                return Err(AurlParseError::MissingHash);
            }
            return Ok(Aurl::new(scheme, body, Vec::new(), "/"));
        };

        let hash = &body[..hash_end];
        if hash.is_empty() {
            return Err(AurlParseError::MissingHash);
        }

        if body.as_bytes()[hash_end] == b'/' {
            return Ok(Aurl::new(scheme, hash, Vec::new(), &body[hash_end..]));
        }

        let candidates_and_path = &body[hash_end + 1..];
        let (candidates, path) = match candidates_and_path.find('/') {
            Some(path_start) => (&candidates_and_path[..path_start], &candidates_and_path[path_start..]),
            None => (candidates_and_path, "/"),
        };

        let mut addresses = Vec::new();
        for candidate in candidates.split('|') {
            let addr: SocketAddr = candidate
                .parse()
                .map_err(|_| AurlParseError::InvalidAddress(candidate.to_string()))?;
            if addr.port() == 0 {
                return Err(AurlParseError::InvalidAddress(candidate.to_string()));
            }
            addresses.push(addr);
        }

        Ok(Aurl::new(scheme, hash, addresses, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_only() {
        let aurl: Aurl = "abyss:abc".parse().unwrap();

        assert_eq!(Scheme::Abyss, aurl.scheme());
        assert_eq!("abc", aurl.hash());
        assert!(aurl.addresses().is_empty());
        assert_eq!("/", aurl.path());
    }

    #[test]
    fn hash_and_path() {
        let aurl: Aurl = "abyss:abc/somepath".parse().unwrap();

        assert_eq!("abc", aurl.hash());
        assert!(aurl.addresses().is_empty());
        assert_eq!("/somepath", aurl.path());
    }

    #[test]
    fn single_address() {
        let aurl: Aurl = "abyss:abc:9.8.7.6:1605/somepath".parse().unwrap();

        assert_eq!("abc", aurl.hash());
        assert_eq!(vec!["9.8.7.6:1605".parse::<SocketAddr>().unwrap()], aurl.addresses());
        assert_eq!("/somepath", aurl.path());
    }

    #[test]
    fn mixed_address_candidates() {
        let aurl: Aurl = "abyss:abc:[2001:db8:85a3:8d3:1319:8a2e:370:7348]:443|9.8.7.6:1605/somepath"
            .parse()
            .unwrap();

        assert_eq!(2, aurl.addresses().len());
        assert!(aurl.addresses()[0].is_ipv6());
        assert!(aurl.addresses()[1].is_ipv4());
    }

    #[test]
    fn abyst_scheme() {
        let aurl: Aurl = "abyst:abc:9.8.7.6:1605".parse().unwrap();

        assert_eq!(Scheme::Abyst, aurl.scheme());
        assert_eq!("/", aurl.path());
    }

    #[test]
    fn double_slash_tolerated() {
        let aurl: Aurl = "abyss://abc/home".parse().unwrap();

        assert_eq!("abc", aurl.hash());
        assert_eq!("/home", aurl.path());
    }

    #[test]
    fn display_roundtrip() {
        for raw in [
            "abyss:abc",
            "abyss:abc/somepath",
            "abyss:abc:9.8.7.6:1605/somepath",
            "abyss:abc:[2001:db8::1]:443|9.8.7.6:1605/somepath",
        ] {
            let aurl: Aurl = raw.parse().unwrap();
            let reparsed: Aurl = aurl.to_string().parse().unwrap();
            assert_eq!(aurl, reparsed);
        }
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(AurlParseError::UnsupportedScheme, "http://abc".parse::<Aurl>().unwrap_err());
        assert_eq!(AurlParseError::MissingHash, "abyss:/somepath".parse::<Aurl>().unwrap_err());
        assert_eq!(AurlParseError::MissingHash, "abyss:".parse::<Aurl>().unwrap_err());
        assert!(matches!(
            "abyss:abc:9.8.7.6:0".parse::<Aurl>().unwrap_err(),
            AurlParseError::InvalidAddress(_)
        ));
        assert!(matches!(
            "abyss:abc:nonsense/p".parse::<Aurl>().unwrap_err(),
            AurlParseError::InvalidAddress(_)
        ));
    }
}
