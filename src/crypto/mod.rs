//! GOST cryptographic primitive stack
//!
//! - Streebog hashing and HMAC (streebog)
//! - Kuznyechik block cipher (kuznyechik)
//! - MGM authenticated encryption (mgm)
//! - RFC 7836 KDF tree and the handshake key splitters (kdf)
//! - GOST R 34.10-2012 curves and VKO key agreement (gost3410)

pub mod gost3410;
pub mod kdf;
pub mod kuznyechik;
pub mod mgm;
pub mod streebog;
