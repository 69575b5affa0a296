use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

const READ_CHUNK: usize = 64 * 1024;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_reader_hex<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open artifact for hashing: {}", path.display()))?;
    sha256_reader_hex(BufReader::new(file))
        .with_context(|| format!("failed to hash artifact: {}", path.display()))
}

pub fn verify_sha256(bytes: &[u8], expected_hex: &str) -> bool {
    digest_matches(&sha256_hex(bytes), expected_hex)
}

pub fn verify_sha256_reader<R: Read>(reader: R, expected_hex: &str) -> io::Result<bool> {
    Ok(digest_matches(&sha256_reader_hex(reader)?, expected_hex))
}

pub fn verify_sha256_file(path: &Path, expected_hex: &str) -> Result<bool> {
    Ok(digest_matches(&sha256_file_hex(path)?, expected_hex))
}

fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected.trim())
}
