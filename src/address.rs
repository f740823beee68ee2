//! Mailbox address decomposition for From/To/Cc header values

use mailparse::{MailAddr, SingleInfo};
use serde::{Deserialize, Serialize};

use crate::error::{GmailError, Result};

/// A bare mailbox address split into its two halves
///
/// `"Bob Smith" <bob.smith@example.com>` becomes
/// `full = "bob.smith@example.com"`, `local_part = "bob.smith"`,
/// `domain = "example.com"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub full: String,
    pub local_part: String,
    pub domain: String,
}

impl Address {
    /// Split a bare `local@domain` string on its first `@`
    pub fn from_bare(bare: &str) -> Result<Self> {
        let bare = bare.trim();
        match bare.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Self {
                full: bare.to_string(),
                local_part: local.to_string(),
                domain: domain.to_string(),
            }),
            _ => Err(GmailError::MalformedAddress(bare.to_string())),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

/// Parse a single mailbox from a header value, dropping any display name
///
/// When the value holds more than one mailbox the first one wins.
pub fn parse_address(header_value: &str) -> Result<Address> {
    let trimmed = header_value.trim();
    if trimmed.is_empty() {
        return Err(GmailError::MalformedAddress(String::new()));
    }

    let list = mailparse::addrparse(trimmed)
        .map_err(|e| GmailError::MalformedAddress(format!("{}: {}", trimmed, e)))?;

    let first = list
        .iter()
        .flat_map(mailboxes)
        .next()
        .ok_or_else(|| GmailError::MalformedAddress(trimmed.to_string()))?;

    Address::from_bare(&first.addr)
}

/// Parse every mailbox in a recipient header, in header order
///
/// The whole value is tried as an RFC 5322 address list first so quoted
/// display names containing commas stay intact. If that fails the value is
/// split on `,` and each piece is parsed on its own. Each entry carries its own
/// result so the caller can drop individual malformed recipients.
pub fn parse_address_list(header_value: &str) -> Vec<Result<Address>> {
    match mailparse::addrparse(header_value.trim()) {
        Ok(list) if !list.is_empty() => list
            .iter()
            .flat_map(mailboxes)
            .map(|info| Address::from_bare(&info.addr))
            .collect(),
        _ => header_value
            .split(',')
            .filter(|piece| !piece.trim().is_empty())
            .map(parse_address)
            .collect(),
    }
}

fn mailboxes(addr: &MailAddr) -> Vec<&SingleInfo> {
    match addr {
        MailAddr::Single(info) => vec![info],
        MailAddr::Group(group) => group.addrs.iter().collect(),
    }
}
