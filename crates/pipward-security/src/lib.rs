mod checksum;
mod license;
mod signature;

pub use checksum::{
    sha256_file_hex, sha256_hex, sha256_reader_hex, verify_sha256, verify_sha256_file,
    verify_sha256_reader,
};
pub use license::{LicensePolicy, LicenseVerdict, DEFAULT_DENIED_LICENSES};
pub use signature::{read_signature_file, verify_manifest_signature};
