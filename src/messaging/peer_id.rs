use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;

/// A peer's identity in the mesh: exactly three ASCII digits, assigned by the registry server.
///
/// NB: Leading zeroes are significant on the wire ("007" and "7" are different strings), so the
///  digits are kept as-is rather than as a number.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerId([u8; 3]);

impl PeerId {
    /// placeholder identity used as the source of the registration request
    pub const UNREGISTERED: PeerId = PeerId(*b"000");
    /// reserved identity of the registry server
    pub const SERVER: PeerId = PeerId(*b"999");

    pub fn as_str(&self) -> &str {
        // only ever constructed from ASCII digits
        std::str::from_utf8(&self.0).unwrap_or("???")
    }

    pub fn is_server(&self) -> bool {
        *self == Self::SERVER
    }
}

impl FromStr for PeerId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(anyhow!("invalid peer id {:?}: expected exactly three digits", s));
        }
        Ok(PeerId([bytes[0], bytes[1], bytes[2]]))
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.as_str())
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::regular("042", true)]
    #[case::leading_zeroes("007", true)]
    #[case::server("999", true)]
    #[case::too_short("42", false)]
    #[case::too_long("0042", false)]
    #[case::not_digits("a42", false)]
    #[case::empty("", false)]
    #[case::unicode_digit("٤٢", false)]
    fn test_from_str(#[case] s: &str, #[case] is_valid: bool) {
        match PeerId::from_str(s) {
            Ok(id) => {
                assert!(is_valid);
                assert_eq!(id.to_string(), s);
            }
            Err(_) => assert!(!is_valid),
        }
    }

    #[test]
    fn test_reserved_ids() {
        assert_eq!(PeerId::SERVER, "999".parse().unwrap());
        assert_eq!(PeerId::UNREGISTERED, "000".parse().unwrap());
        assert!(PeerId::SERVER.is_server());
        assert!(!PeerId::UNREGISTERED.is_server());
    }
}
