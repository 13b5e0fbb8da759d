/// Serde support for fixed-size byte wrappers
/// 
/// Serializes as a byte string and accepts either a byte string (bincode)
/// or a sequence of integers (JSON) on the way back in. The wrapped type
/// must provide `as_bytes()` and a validating `from_bytes(&[u8])`.

macro_rules! impl_bytes_serde {
    ($ty:ident, $expecting:expr) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_bytes(self.as_bytes())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                use serde::de::{self, Visitor};
                use std::fmt;

                struct BytesVisitor;

                impl<'de> Visitor<'de> for BytesVisitor {
                    type Value = $ty;

                    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                        formatter.write_str($expecting)
                    }

                    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
                    where
                        E: de::Error,
                    {
                        $ty::from_bytes(v).map_err(de::Error::custom)
                    }

                    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
                    where
                        A: de::SeqAccess<'de>,
                    {
                        let mut bytes = Vec::new();
                        while let Some(byte) = seq.next_element::<u8>()? {
                            bytes.push(byte);
                        }
                        $ty::from_bytes(&bytes).map_err(de::Error::custom)
                    }
                }

                deserializer.deserialize_bytes(BytesVisitor)
            }
        }
    };
}
