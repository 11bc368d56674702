use std::sync::OnceLock;

use secp256k1::{All, Secp256k1};

static SECP256K1_CONTEXT: OnceLock<Secp256k1<All>> = OnceLock::new();

/// Shared context; Schnorr verification needs generator multiplication as well as verification.
pub(crate) fn secp256k1_context() -> &'static Secp256k1<All> {
    SECP256K1_CONTEXT.get_or_init(Secp256k1::new)
}
