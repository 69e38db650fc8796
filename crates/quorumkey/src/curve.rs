//! secp256k1 arithmetic adapter
//!
//! thin layer over k256 speaking the encodings custodian nodes use:
//! 64-char zero-padded big-endian hex for scalars and coordinates, SEC1
//! uncompressed points, and keccak-256 derived checksummed addresses.

use k256::{
    elliptic_curve::{
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        PrimeField,
    },
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256,
};
use sha3::{Digest, Keccak256};

use crate::{Error, Result};

/// secp256k1 group order
pub const CURVE_ORDER_HEX: &str =
    "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141";

/// width of a hex encoded scalar or coordinate
pub const HEX_WIDTH: usize = 64;

/// left-pad a hex string with zeros to 64 characters, lowercased
pub fn pad_hex64(s: &str) -> Result<String> {
    let s = s.trim_start_matches("0x").to_ascii_lowercase();
    if s.len() > HEX_WIDTH || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidHex(s));
    }
    Ok(format!("{:0>width$}", s, width = HEX_WIDTH))
}

/// decode a (possibly unpadded) hex string into 32 big-endian bytes
pub fn hex_to_bytes32(s: &str) -> Result<[u8; 32]> {
    let padded = pad_hex64(s)?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(&padded, &mut out).map_err(|e| Error::InvalidHex(e.to_string()))?;
    Ok(out)
}

/// parse a hex integer and reduce it modulo the curve order
pub fn scalar_from_hex(s: &str) -> Result<Scalar> {
    let bytes = hex_to_bytes32(s)?;
    Ok(<Scalar as Reduce<U256>>::reduce(U256::from_be_slice(&bytes)))
}

/// parse a canonical 32-byte big-endian scalar (must already be below the order)
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    if bytes.len() != 32 {
        return Err(Error::InvalidScalar);
    }
    let repr = FieldBytes::clone_from_slice(bytes);
    Option::from(Scalar::from_repr(repr)).ok_or(Error::InvalidScalar)
}

/// fixed-width lowercase hex of a scalar
pub fn scalar_to_hex(s: &Scalar) -> String {
    hex::encode(s.to_bytes())
}

/// `s·G`
pub fn scalar_to_point(s: &Scalar) -> ProjectivePoint {
    ProjectivePoint::GENERATOR * s
}

/// sum of points (EC point addition)
pub fn combine_points(points: &[ProjectivePoint]) -> ProjectivePoint {
    points
        .iter()
        .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p)
}

/// build a point from hex affine coordinates
pub fn point_from_coordinates(x: &str, y: &str) -> Result<ProjectivePoint> {
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..33].copy_from_slice(&hex_to_bytes32(x)?);
    sec1[33..].copy_from_slice(&hex_to_bytes32(y)?);
    point_from_sec1(&sec1)
}

/// parse a SEC1 encoded point (compressed or uncompressed)
pub fn point_from_sec1(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| Error::InvalidPoint)?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine.map(ProjectivePoint::from).ok_or(Error::InvalidPoint)
}

/// SEC1 uncompressed encoding `04 || x || y`
pub fn to_uncompressed(p: &ProjectivePoint) -> Result<[u8; 65]> {
    let encoded = p.to_affine().to_encoded_point(false);
    encoded
        .as_bytes()
        .try_into()
        .map_err(|_| Error::InvalidPoint)
}

/// padded hex affine coordinates of a point
pub fn point_coordinates(p: &ProjectivePoint) -> Result<(String, String)> {
    let sec1 = to_uncompressed(p)?;
    Ok((hex::encode(&sec1[1..33]), hex::encode(&sec1[33..])))
}

/// keccak-256
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// checksummed (EIP-55) address of a public key point
pub fn public_key_to_address(p: &ProjectivePoint) -> Result<String> {
    let sec1 = to_uncompressed(p)?;
    let digest = keccak256(&sec1[1..]);
    let lower = hex::encode(&digest[12..]);
    let checksum = keccak256(lower.as_bytes());

    let mut address = String::with_capacity(42);
    address.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (checksum[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            address.push(c.to_ascii_uppercase());
        } else {
            address.push(c);
        }
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::elliptic_curve::Field;

    #[test]
    fn test_pad_hex64() {
        assert_eq!(pad_hex64("ab").unwrap().len(), 64);
        assert!(pad_hex64("ab").unwrap().ends_with("00ab"));
        assert_eq!(pad_hex64("0xAB").unwrap(), pad_hex64("ab").unwrap());
        assert!(pad_hex64(&"f".repeat(65)).is_err());
        assert!(pad_hex64("zz").is_err());
    }

    #[test]
    fn test_known_addresses() {
        // private keys 1 and 2 have well known addresses
        let one = scalar_to_point(&Scalar::ONE);
        assert_eq!(
            public_key_to_address(&one).unwrap(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
        let two = scalar_to_point(&Scalar::from(2u64));
        assert_eq!(
            public_key_to_address(&two).unwrap(),
            "0x2B5AD5c4795c026514f8317c7a215E218DcCD6cF"
        );
    }

    #[test]
    fn test_coordinates_roundtrip_through_hex() {
        let s = Scalar::random(&mut rand::thread_rng());
        let p = scalar_to_point(&s);
        let (x, y) = point_coordinates(&p).unwrap();
        assert_eq!(x.len(), 64);
        assert_eq!(point_from_coordinates(&x, &y).unwrap(), p);
    }

    #[test]
    fn test_combine_is_point_addition() {
        let a = Scalar::from(7u64);
        let b = Scalar::from(35u64);
        let combined = combine_points(&[scalar_to_point(&a), scalar_to_point(&b)]);
        assert_eq!(combined, scalar_to_point(&(a + b)));
    }

    #[test]
    fn test_scalar_hex_reduces_mod_order() {
        // n + 4 reduces to 4
        let n_plus_4 = "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364145";
        assert_eq!(scalar_from_hex(n_plus_4).unwrap(), Scalar::from(4u64));
        assert_eq!(scalar_from_hex(CURVE_ORDER_HEX).unwrap(), Scalar::ZERO);
    }

    #[test]
    fn test_scalar_hex_is_fixed_width() {
        let hex = scalar_to_hex(&Scalar::from(1u64));
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, format!("{:0>64}", "1"));
    }

    #[test]
    fn test_off_curve_point_rejected() {
        assert!(matches!(
            point_from_coordinates("1", "1"),
            Err(Error::InvalidPoint)
        ));
    }
}
