/* Coinjoin Coordinator
 * Written by the Coinjoin Coordinator developers
 *
 * To the extent possible under law, the author(s) have dedicated all
 * copyright and related and neighboring rights to this software to
 * the public domain worldwide. This software is distributed without
 * any warranty.
 *
 * You should have received a copy of the CC0 Public Domain Dedication
 * along with this software.
 * If not, see <http://creativecommons.org/publicdomain/zero/1.0/>.
 */

//! # Macros
//!
//! Macros to implement boilerplate for identifier types.

/// Defines a random 64-bit identifier which displays and serializes as a
/// 16-digit hex string
macro_rules! hex_id {
  ($(#[$attr:meta])* $name:ident) => {
    $(#[$attr])*
    #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
    pub struct $name(pub u64);

    impl $name {
      /// Big-endian encoding of the identifier
      pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
      }
    }

    impl ::std::fmt::Display for $name {
      fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{:016x}", self.0)
      }
    }

    impl ::std::str::FromStr for $name {
      type Err = ::std::num::ParseIntError;

      fn from_str(s: &str) -> Result<$name, ::std::num::ParseIntError> {
        u64::from_str_radix(s, 16).map($name)
      }
    }

    impl ::serde::Serialize for $name {
      fn serialize<S: ::serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
      }
    }

    impl<'de> ::serde::Deserialize<'de> for $name {
      fn deserialize<D: ::serde::Deserializer<'de>>(d: D) -> Result<$name, D::Error> {
        let st = <String as ::serde::Deserialize>::deserialize(d)?;
        st.parse().map_err(|_| {
          <D::Error as ::serde::de::Error>::custom(concat!(stringify!($name), " was not a valid hex string"))
        })
      }
    }
  }
}
