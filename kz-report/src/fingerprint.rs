use std::collections::hash_map::DefaultHasher;
use std::hash::{
    Hash,
    Hasher,
};

use kz_api::v1alpha1::ObjectIdentity;

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// The stable report id for one drift episode: the same parent/child pair at
// the same parent generation always fingerprints identically, so a noisy
// controller fighting its parent produces exactly one Detected report.
pub fn report_fingerprint(parent: &ObjectIdentity, child: &ObjectIdentity) -> String {
    let mut s = DefaultHasher::new();
    (
        &parent.kind,
        &parent.namespace,
        &parent.name,
        &child.kind,
        &child.namespace,
        &child.name,
        parent.generation.unwrap_or(0),
    )
        .hash(&mut s);

    let mut v = s.finish();
    let mut out = String::new();
    loop {
        out.push(BASE36_ALPHABET[(v % 36) as usize] as char);
        v /= 36;
        if v == 0 {
            break;
        }
    }
    out
}
