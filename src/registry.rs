//! Resource address table used to parametrize hardware tests.
//!
//! Maps an endpoint category (`"TCPIP::INSTR"`, `"TCPIP::SOCKET"`, ...) to the
//! concrete VISA resource address the buildbot exposes for it, and maps some
//! addresses to short aliases used in test names. The table is static; no
//! lookup ever touches the network or the instrument.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;

use crate::error::{HarnessError, HarnessResult};

/// Category → address pairs of the virtual instrument endpoints.
///
/// USB (`"USB::INSTR"`) and GPIB (`"GPIB::INSTR"`, `GPIB::19::INSTR`)
/// endpoints are not wired on the buildbot.
pub const RESOURCE_ADDRESSES: &[(&str, &str)] = &[
    ("TCPIP::INSTR", "TCPIP::192.168.0.2::INSTR"),
    ("TCPIP::SOCKET", "TCPIP::192.168.0.2::5025::SOCKET"),
];

/// Address → alias pairs used for readable test names.
pub const ALIASES: &[(&str, &str)] = &[("TCPIP::192.168.0.2::INSTR", "tcpip")];

static BUILTIN: Lazy<ResourceAddressRegistry> = Lazy::new(|| ResourceAddressRegistry {
    addresses: RESOURCE_ADDRESSES
        .iter()
        .map(|(category, address)| (category.to_string(), address.to_string()))
        .collect(),
    aliases: ALIASES
        .iter()
        .map(|(address, alias)| (address.to_string(), alias.to_string()))
        .collect(),
});

/// An endpoint category: interface type plus resource class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceCategory {
    /// Interface type without board number, e.g. `TCPIP`.
    pub interface: String,
    /// Resource class, e.g. `INSTR` or `SOCKET`.
    pub resource_class: String,
}

impl ResourceCategory {
    /// Whether a concrete address belongs to this category.
    ///
    /// The address' first segment must be the interface (optionally followed
    /// by a board number, `TCPIP0`) and its last segment the resource class.
    pub fn matches(&self, address: &str) -> bool {
        let segments: Vec<&str> = address.split("::").collect();
        if segments.len() < 2 {
            return false;
        }
        let head = segments[0].to_ascii_uppercase();
        let tail = segments[segments.len() - 1].to_ascii_uppercase();

        let board = head.strip_prefix(self.interface.as_str());
        let interface_ok = matches!(board, Some(rest) if rest.chars().all(|c| c.is_ascii_digit()));
        interface_ok && tail == self.resource_class
    }
}

impl FromStr for ResourceCategory {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split("::").collect::<Vec<_>>().as_slice() {
            [interface, resource_class] if !interface.is_empty() && !resource_class.is_empty() => {
                Ok(Self {
                    interface: interface.to_ascii_uppercase(),
                    resource_class: resource_class.to_ascii_uppercase(),
                })
            }
            _ => Err(HarnessError::Registry(format!(
                "Invalid resource category '{s}'. Expected '<INTERFACE>::<CLASS>'"
            ))),
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.interface, self.resource_class)
    }
}

/// One parametrization point: a category with its address and alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCase {
    /// Category key, e.g. `TCPIP::INSTR`.
    pub category: String,
    /// Concrete resource address.
    pub address: String,
    /// Alias used in test names; the address when none is registered.
    pub alias: String,
}

/// Read-only category → address and address → alias lookup.
#[derive(Debug, Clone)]
pub struct ResourceAddressRegistry {
    addresses: Vec<(String, String)>,
    aliases: Vec<(String, String)>,
}

impl ResourceAddressRegistry {
    /// The buildbot's endpoint table.
    pub fn builtin() -> &'static ResourceAddressRegistry {
        &BUILTIN
    }

    /// Builds a registry, checking that
    /// - every category parses and appears once,
    /// - every address matches its category,
    /// - every alias key is one of the registered addresses, aliased once.
    pub fn new<C, A, K, V>(addresses: C, aliases: A) -> HarnessResult<Self>
    where
        C: IntoIterator<Item = (K, V)>,
        A: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let addresses: Vec<(String, String)> = addresses
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let aliases: Vec<(String, String)> = aliases
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut seen = std::collections::HashSet::new();
        for (category, address) in &addresses {
            if !seen.insert(category.as_str()) {
                return Err(HarnessError::Registry(format!(
                    "Duplicate resource category: {category}"
                )));
            }
            let parsed: ResourceCategory = category.parse()?;
            if !parsed.matches(address) {
                return Err(HarnessError::Registry(format!(
                    "Address '{address}' does not belong to category '{category}'"
                )));
            }
        }

        let mut aliased = std::collections::HashSet::new();
        for (address, alias) in &aliases {
            if !addresses.iter().any(|(_, known)| known == address) {
                return Err(HarnessError::Registry(format!(
                    "Alias '{alias}' refers to unregistered address '{address}'"
                )));
            }
            if !aliased.insert(address.as_str()) {
                return Err(HarnessError::Registry(format!(
                    "Address '{address}' has more than one alias"
                )));
            }
        }

        Ok(Self { addresses, aliases })
    }

    /// Concrete address registered for `category`.
    pub fn address_for(&self, category: &str) -> Option<&str> {
        self.addresses
            .iter()
            .find(|(known, _)| known == category)
            .map(|(_, address)| address.as_str())
    }

    /// Alias of `address`, or the address itself if none is registered.
    pub fn alias_for<'a>(&'a self, address: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(known, _)| known == address)
            .map(|(_, alias)| alias.as_str())
            .unwrap_or(address)
    }

    /// Registered categories in table order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.addresses.iter().map(|(category, _)| category.as_str())
    }

    /// One case per registered category, in table order.
    pub fn cases(&self) -> impl Iterator<Item = ResourceCase> + '_ {
        self.addresses.iter().map(|(category, address)| ResourceCase {
            category: category.clone(),
            address: address.clone(),
            alias: self.alias_for(address).to_string(),
        })
    }

    /// Number of registered categories.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// `true` if no category is registered.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
