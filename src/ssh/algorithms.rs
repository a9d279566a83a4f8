//! Algorithm suites offered during the SSH handshake
//!
//! Two tiers. The primary tier is tried first and covers modern servers plus
//! the common legacy ciphers and MACs. The fallback tier is only used after the
//! server rejected everything in the primary tier; its key exchange list is
//! disjoint from the primary one and restricted to SHA-1 Diffie-Hellman groups
//! that very old servers still speak. 3DES is offered there, last.

use std::borrow::Cow;

use russh::{cipher, kex, mac, Preferred};

/// Which suite a connection attempt used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmTier {
    Primary,
    Fallback,
}

impl AlgorithmTier {
    pub fn preferred(self) -> Preferred {
        match self {
            AlgorithmTier::Primary => primary_suite(),
            AlgorithmTier::Fallback => fallback_suite(),
        }
    }
}

const PRIMARY_KEX: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::EXTENSION_SUPPORT_AS_CLIENT,
    kex::EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT,
];

const PRIMARY_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

const PRIMARY_MACS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

const FALLBACK_KEX: &[kex::Name] = &[
    kex::DH_G14_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_G1_SHA1,
    kex::EXTENSION_SUPPORT_AS_CLIENT,
];

const FALLBACK_CIPHERS: &[cipher::Name] = &[
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_128_CBC,
    cipher::AES_256_CBC,
    cipher::TRIPLE_DES_CBC,
];

const FALLBACK_MACS: &[mac::Name] = &[mac::HMAC_SHA1, mac::HMAC_SHA256, mac::HMAC_SHA512];

/// Broad modern-to-legacy suite
pub fn primary_suite() -> Preferred {
    Preferred {
        kex: Cow::Borrowed(PRIMARY_KEX),
        cipher: Cow::Borrowed(PRIMARY_CIPHERS),
        mac: Cow::Borrowed(PRIMARY_MACS),
        ..Preferred::default()
    }
}

/// Minimal, maximally compatible suite
pub fn fallback_suite() -> Preferred {
    Preferred {
        kex: Cow::Borrowed(FALLBACK_KEX),
        cipher: Cow::Borrowed(FALLBACK_CIPHERS),
        mac: Cow::Borrowed(FALLBACK_MACS),
        ..Preferred::default()
    }
}
