//! User authentication methods (UAMs) as a capability set.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Set of user authentication methods
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct UamMask: u32 {
        /// Guest login, no credentials
        const NO_USER_AUTHENT = 1 << 0;
        /// Password sent in the clear
        const CLEARTXT_PASSWRD = 1 << 1;
        /// DES random number exchange
        const RANDNUM_EXCHANGE = 1 << 2;
        /// Two-way DES random number exchange
        const TWO_WAY_RANDNUM = 1 << 3;
        /// Diffie-Hellman exchange with CAST-128
        const DHCAST128 = 1 << 4;
        /// Kerberos v2 client
        const CLIENT_KRB = 1 << 5;
        /// Diffie-Hellman exchange, version 2
        const DHX2 = 1 << 6;
        /// Reconnect token
        const RECON1 = 1 << 7;
    }
}

const UAM_NAMES: [(UamMask, &str); 8] = [
    (UamMask::NO_USER_AUTHENT, "No User Authent"),
    (UamMask::CLEARTXT_PASSWRD, "Cleartxt Passwrd"),
    (UamMask::RANDNUM_EXCHANGE, "Randnum exchange"),
    (UamMask::TWO_WAY_RANDNUM, "2-Way Randnum exchange"),
    (UamMask::DHCAST128, "DHCAST128"),
    (UamMask::CLIENT_KRB, "Client Krb v2"),
    (UamMask::DHX2, "DHX2"),
    (UamMask::RECON1, "Recon1"),
];

impl UamMask {
    /// Look up a single method by its protocol name (case-insensitive)
    pub fn from_uam_name(name: &str) -> Option<UamMask> {
        UAM_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(m, _)| *m)
    }

    /// Protocol name of a single-method mask
    pub fn name(self) -> Option<&'static str> {
        UAM_NAMES.iter().find(|(m, _)| *m == self).map(|(_, n)| *n)
    }

    /// Methods in both sets
    pub fn intersection_with(self, other: UamMask) -> UamMask {
        self & other
    }

    /// Single-method masks, strongest (highest bit) first
    pub fn strongest_first(self) -> impl Iterator<Item = UamMask> {
        UAM_NAMES
            .into_iter()
            .rev()
            .map(|(m, _)| m)
            .filter(move |m| self.contains(*m))
    }

    /// The strongest method in the set
    pub fn strongest(self) -> Option<UamMask> {
        self.strongest_first().next()
    }
}

impl fmt::Display for UamMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = UAM_NAMES
            .iter()
            .filter(|(m, _)| self.contains(*m))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lookup() {
        assert_eq!(UamMask::from_uam_name("cleartxt passwrd"), Some(UamMask::CLEARTXT_PASSWRD));
        assert_eq!(UamMask::from_uam_name("DHX2"), Some(UamMask::DHX2));
        assert_eq!(UamMask::from_uam_name("Kerberos"), None);
        assert_eq!(UamMask::NO_USER_AUTHENT.name(), Some("No User Authent"));
        assert_eq!((UamMask::DHX2 | UamMask::RECON1).name(), None);
    }

    #[test]
    fn test_strongest_ordering() {
        let mask = UamMask::NO_USER_AUTHENT | UamMask::CLEARTXT_PASSWRD | UamMask::DHX2;
        let order: Vec<_> = mask.strongest_first().collect();
        assert_eq!(
            order,
            vec![UamMask::DHX2, UamMask::CLEARTXT_PASSWRD, UamMask::NO_USER_AUTHENT]
        );
        assert_eq!(UamMask::empty().strongest(), None);
    }

    #[test]
    fn test_intersection() {
        let client = UamMask::CLEARTXT_PASSWRD | UamMask::DHX2;
        let server = UamMask::NO_USER_AUTHENT | UamMask::CLEARTXT_PASSWRD;
        assert_eq!(client.intersection_with(server), UamMask::CLEARTXT_PASSWRD);
        assert_eq!(format!("{}", server), "[No User Authent, Cleartxt Passwrd]");
    }
}
