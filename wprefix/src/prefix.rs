// Copyright 2022 Oxide Computer Company

//! Mapping between the abstract prefix space rules are compiled in and real
//! IP networks. Rules are compiled over offsets `[0, 2^P)`; a base network
//! `base/len` places those P bits directly after its own `len` bits.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bits::{BitPath, MAX_WIDTH};
use crate::error::Error;
use crate::partition::Compilation;

#[derive(Debug, Clone, Copy, PartialEq, Hash, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub addr: IpAddr,
    pub len: u8,
}

fn addr_width(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn addr_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from(*a) as u128,
        IpAddr::V6(a) => u128::from(*a),
    }
}

fn addr_from_bits(v4: bool, bits: u128) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::from(bits as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(bits))
    }
}

/// Network mask of `len` leading ones in a `width` bit address.
fn mask(len: u8, width: u8) -> u128 {
    let full = if width == 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    };
    full & !full.checked_shr(len as u32).unwrap_or(0)
}

impl Prefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, Error> {
        let width = addr_width(&addr);
        if len > width {
            return Err(Error::invalid(
                "prefix",
                format!("length {} exceeds {} bits", len, width),
            ));
        }
        if addr_bits(&addr) & !mask(len, width) != 0 {
            return Err(Error::invalid(
                "prefix",
                format!("{}/{} has host bits set", addr, len),
            ));
        }
        Ok(Self { addr, len })
    }

    /// Address width in bits, 32 or 128.
    pub fn width(&self) -> u8 {
        addr_width(&self.addr)
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        if addr.is_ipv4() != self.addr.is_ipv4() {
            return false;
        }
        let m = mask(self.len, self.width());
        addr_bits(&addr) & m == addr_bits(&self.addr) & m
    }

    /// The concrete network a compiled rule prefix selects when the rule
    /// space starts right after this prefix.
    pub fn project(&self, bits: &BitPath) -> Result<Prefix, Error> {
        let len = self.len as usize + bits.len();
        if len > self.width() as usize {
            return Err(Error::invalid(
                "project prefix",
                format!(
                    "{} rule bits do not fit after {}",
                    bits.len(),
                    self
                ),
            ));
        }
        let shift = self.width() as usize - len;
        let tail = (bits.value() as u128) << shift;
        Ok(Prefix {
            addr: addr_from_bits(
                self.addr.is_ipv4(),
                addr_bits(&self.addr) | tail,
            ),
            len: len as u8,
        })
    }

    /// The `depth` bits of `addr` that follow this prefix, the trie key of an
    /// observed address.
    pub fn key_bits(&self, addr: IpAddr, depth: usize) -> Result<BitPath, Error> {
        if !self.contains(addr) {
            return Err(Error::invalid(
                "address key",
                format!("{} is outside {}", addr, self),
            ));
        }
        let end = self.len as usize + depth;
        if depth > MAX_WIDTH || end > self.width() as usize {
            return Err(Error::invalid(
                "address key",
                format!("{} bits do not fit after {}", depth, self),
            ));
        }
        let shifted = addr_bits(&addr) >> (self.width() as usize - end);
        let value = shifted & ((1u128 << depth) - 1);
        Ok(BitPath::from_value(value as u64, depth))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((a, l)) => (a, l),
            None => {
                return Err(Error::invalid(
                    "parse prefix",
                    format!("expected <addr>/<len>, got '{}'", s),
                ))
            }
        };
        let addr: IpAddr = addr.parse().map_err(|e| {
            Error::invalid("parse prefix", format!("{}: {}", addr, e))
        })?;
        let len: u8 = len.parse().map_err(|e| {
            Error::invalid("parse prefix", format!("{}: {}", len, e))
        })?;
        Prefix::new(addr, len)
    }
}

/// How compiled rules are placed onto real addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Network the rule space is carved out of.
    pub base: Prefix,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base: Prefix {
                addr: IpAddr::V4(Ipv4Addr::new(10, 2, 0, 0)),
                len: 16,
            },
        }
    }
}

/// A compiled rule placed onto a concrete network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRule<B> {
    pub prefix: BitPath,
    pub network: Prefix,
    pub backend: B,
}

/// Place every rule of `compilation` under the base network of `settings`.
pub fn render<B: Clone>(
    compilation: &Compilation<B>,
    settings: &Settings,
) -> Result<Vec<NetworkRule<B>>, Error> {
    let base = &settings.base;
    if base.len as usize + compilation.width > base.width() as usize {
        return Err(Error::invalid(
            "render rules",
            format!(
                "{} rule bits do not fit after {}",
                compilation.width, base
            ),
        ));
    }
    compilation
        .rules
        .iter()
        .map(|r| {
            Ok(NetworkRule {
                prefix: r.prefix.clone(),
                network: base.project(&r.prefix)?,
                backend: r.backend.clone(),
            })
        })
        .collect()
}
