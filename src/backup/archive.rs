//! Encrypted, framed backup archive format.
//!
//! Layout (version 1):
//!
//! ```text
//! header  magic "KRAPIBK\0" | version u16 | kdf memory u32 | kdf iterations u32
//!         | kdf parallelism u32 | salt [16] | nonce prefix [8]
//! frame*  len u32 | flags u8 | AES-256-GCM ciphertext (len bytes)
//! ```
//!
//! Integers are big-endian. Frame `n` is sealed with nonce `prefix ‖ n` and
//! associated data `header ‖ n ‖ flags`, so frames cannot be reordered, moved
//! between archives or stripped of the `LAST` flag. Decrypted frames form a
//! MessagePack stream of [`Record`]s ending in [`Record::End`].

use std::io::{self, Read, Write};

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub const MAGIC: &[u8; 8] = b"KRAPIBK\0";
pub const ARCHIVE_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 8 + 2 + 12 + SALT_SIZE + NONCE_PREFIX_SIZE;
/// Maximum plaintext bytes per frame.
pub const FRAME_SIZE: usize = 64 * 1024;

const SALT_SIZE: usize = 16;
const NONCE_PREFIX_SIZE: usize = 8;
const KEY_SIZE: usize = 32;
const TAG_SIZE: usize = 16;
const FLAG_LAST: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
  #[error("not a backup archive")]
  BadMagic,

  #[error("archive version {found} is not supported (newest supported is {supported})")]
  UnsupportedVersion { found: u16, supported: u16 },

  #[error("invalid backup password")]
  InvalidPassword,

  #[error("corrupt archive: frame {index} failed authentication")]
  CorruptFrame { index: u32 },

  #[error("archive is truncated")]
  Truncated,

  #[error("archive has data after its final frame")]
  TrailingData,

  #[error("unexpected {0} record in archive")]
  UnexpectedRecord(&'static str),

  #[error("archive holds {found}, expected {expected}")]
  ScopeMismatch { expected: String, found: String },

  #[error("archive table '{0}' does not exist in the target database")]
  UnknownTable(String),

  #[error("key derivation failed: {0}")]
  Kdf(String),

  #[error("archive encryption failed")]
  Encryption,

  #[error("archive i/o: {0}")]
  Io(#[from] io::Error),

  #[error("failed to encode archive record: {0}")]
  Encode(#[from] rmp_serde::encode::Error),

  #[error("failed to decode archive record: {0}")]
  Decode(#[from] rmp_serde::decode::Error),
}

/// Argon2id cost parameters, recorded in every archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
  pub memory_kib: u32,
  pub iterations: u32,
  pub parallelism: u32,
}

/// Which database a run of `Table`/`Row` records belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotScope {
  Main,
  Project(String),
}

impl std::fmt::Display for SnapshotScope {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Main => write!(f, "the main database"),
      Self::Project(id) => write!(f, "project '{}'", id),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
  Database { scope: SnapshotScope },
  Table { name: String, columns: Vec<String> },
  Row(Vec<Cell>),
  End,
}

/// One SQLite column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for Cell {
  fn from(value: ValueRef<'_>) -> Self {
    match value {
      ValueRef::Null => Cell::Null,
      ValueRef::Integer(i) => Cell::Integer(i),
      ValueRef::Real(f) => Cell::Real(f),
      ValueRef::Text(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
      ValueRef::Blob(b) => Cell::Blob(b.to_vec()),
    }
  }
}

impl ToSql for Cell {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(match self {
      Cell::Null => ToSqlOutput::Owned(Value::Null),
      Cell::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
      Cell::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
      Cell::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
      Cell::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
    })
  }
}

/// Size and SHA-256 of a finished archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
  pub size: u64,
  pub checksum: String,
}

struct Header {
  version: u16,
  kdf: KdfParams,
  salt: [u8; SALT_SIZE],
  nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl Header {
  fn encode(&self) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..8].copy_from_slice(MAGIC);
    out[8..10].copy_from_slice(&self.version.to_be_bytes());
    out[10..14].copy_from_slice(&self.kdf.memory_kib.to_be_bytes());
    out[14..18].copy_from_slice(&self.kdf.iterations.to_be_bytes());
    out[18..22].copy_from_slice(&self.kdf.parallelism.to_be_bytes());
    out[22..38].copy_from_slice(&self.salt);
    out[38..46].copy_from_slice(&self.nonce_prefix);
    out
  }

  fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, ArchiveError> {
    if &bytes[0..8] != MAGIC {
      return Err(ArchiveError::BadMagic);
    }
    let version = u16::from_be_bytes([bytes[8], bytes[9]]);
    if version == 0 || version > ARCHIVE_VERSION {
      return Err(ArchiveError::UnsupportedVersion {
        found: version,
        supported: ARCHIVE_VERSION,
      });
    }
    let u32_at = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&bytes[22..38]);
    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    nonce_prefix.copy_from_slice(&bytes[38..46]);
    Ok(Self {
      version,
      kdf: KdfParams {
        memory_kib: u32_at(10),
        iterations: u32_at(14),
        parallelism: u32_at(18),
      },
      salt,
      nonce_prefix,
    })
  }
}

fn derive_cipher(password: &[u8], salt: &[u8], kdf: KdfParams) -> Result<Aes256Gcm, ArchiveError> {
  let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_SIZE))
    .map_err(|e| ArchiveError::Kdf(e.to_string()))?;
  let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
  let mut key = Zeroizing::new([0u8; KEY_SIZE]);
  argon
    .hash_password_into(password, salt, &mut key[..])
    .map_err(|e| ArchiveError::Kdf(e.to_string()))?;
  Ok(Aes256Gcm::new(GenericArray::from_slice(&key[..])))
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32) -> [u8; 12] {
  let mut nonce = [0u8; 12];
  nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
  nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&counter.to_be_bytes());
  nonce
}

fn frame_aad(header: &[u8; HEADER_SIZE], counter: u32, flags: u8) -> Vec<u8> {
  let mut aad = Vec::with_capacity(HEADER_SIZE + 5);
  aad.extend_from_slice(header);
  aad.extend_from_slice(&counter.to_be_bytes());
  aad.push(flags);
  aad
}

fn invalid_data(err: &ArchiveError) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

/// Encrypting archive writer. Bytes written through [`Write`] are buffered and
/// sealed into frames of [`FRAME_SIZE`]; [`FrameWriter::finish`] must be
/// called to write the final frame.
pub struct FrameWriter<W: Write> {
  inner: W,
  cipher: Aes256Gcm,
  header: [u8; HEADER_SIZE],
  nonce_prefix: [u8; NONCE_PREFIX_SIZE],
  counter: u32,
  buffer: Vec<u8>,
  hasher: Sha256,
  written: u64,
}

impl<W: Write> FrameWriter<W> {
  /// Derives the key from `password` and writes the header.
  pub fn new(mut inner: W, password: &str, kdf: KdfParams) -> Result<Self, ArchiveError> {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce_prefix);

    let header = Header {
      version: ARCHIVE_VERSION,
      kdf,
      salt,
      nonce_prefix,
    }
    .encode();
    let cipher = derive_cipher(password.as_bytes(), &salt, kdf)?;

    inner.write_all(&header)?;
    let mut hasher = Sha256::new();
    hasher.update(header);

    Ok(Self {
      inner,
      cipher,
      header,
      nonce_prefix,
      counter: 0,
      buffer: Vec::with_capacity(FRAME_SIZE),
      hasher,
      written: HEADER_SIZE as u64,
    })
  }

  pub fn write_record(&mut self, record: &Record) -> Result<(), ArchiveError> {
    rmp_serde::encode::write(self, record)?;
    Ok(())
  }

  fn seal(&mut self, plaintext: &[u8], flags: u8) -> Result<(), ArchiveError> {
    let nonce = frame_nonce(&self.nonce_prefix, self.counter);
    let aad = frame_aad(&self.header, self.counter, flags);
    let ciphertext = self
      .cipher
      .encrypt(
        Nonce::from_slice(&nonce),
        Payload {
          msg: plaintext,
          aad: &aad,
        },
      )
      .map_err(|_| ArchiveError::Encryption)?;

    let len = u32::try_from(ciphertext.len()).map_err(|_| ArchiveError::Encryption)?;
    let mut prefix = [0u8; 5];
    prefix[..4].copy_from_slice(&len.to_be_bytes());
    prefix[4] = flags;

    self.inner.write_all(&prefix)?;
    self.inner.write_all(&ciphertext)?;
    self.hasher.update(prefix);
    self.hasher.update(&ciphertext);
    self.written += (prefix.len() + ciphertext.len()) as u64;
    self.counter = self.counter.checked_add(1).ok_or(ArchiveError::Encryption)?;
    Ok(())
  }

  /// Writes the `End` record and the final frame. Returns the summary and the
  /// underlying writer, flushed.
  pub fn finish(mut self) -> Result<(ArchiveSummary, W), ArchiveError> {
    self.write_record(&Record::End)?;
    let rest = std::mem::take(&mut self.buffer);
    self.seal(&rest, FLAG_LAST)?;
    self.inner.flush()?;

    let summary = ArchiveSummary {
      size: self.written,
      checksum: hex::encode(self.hasher.finalize()),
    };
    Ok((summary, self.inner))
  }
}

impl<W: Write> Write for FrameWriter<W> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.buffer.extend_from_slice(buf);
    while self.buffer.len() >= FRAME_SIZE {
      let chunk: Vec<u8> = self.buffer.drain(..FRAME_SIZE).collect();
      self.seal(&chunk, 0).map_err(|e| invalid_data(&e))?;
    }
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    self.inner.flush()
  }
}

/// Decrypting archive reader. Frames are authenticated one at a time as the
/// record stream is consumed.
pub struct FrameReader<R: Read> {
  inner: R,
  cipher: Aes256Gcm,
  header: [u8; HEADER_SIZE],
  nonce_prefix: [u8; NONCE_PREFIX_SIZE],
  version: u16,
  counter: u32,
  frame: Zeroizing<Vec<u8>>,
  pos: usize,
  last_seen: bool,
  error: Option<ArchiveError>,
}

impl<R: Read> FrameReader<R> {
  /// Reads the header, derives the key and authenticates the first frame, so
  /// a wrong password fails here with `InvalidPassword`.
  pub fn open(mut inner: R, password: &str) -> Result<Self, ArchiveError> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact_or_truncated(&mut inner, &mut header)?;
    let parsed = Header::decode(&header)?;
    let cipher = derive_cipher(password.as_bytes(), &parsed.salt, parsed.kdf)?;

    let mut reader = Self {
      inner,
      cipher,
      header,
      nonce_prefix: parsed.nonce_prefix,
      version: parsed.version,
      counter: 0,
      frame: Zeroizing::new(Vec::new()),
      pos: 0,
      last_seen: false,
      error: None,
    };
    reader.read_frame()?;
    Ok(reader)
  }

  pub fn version(&self) -> u16 {
    self.version
  }

  fn read_frame(&mut self) -> Result<(), ArchiveError> {
    let index = self.counter;
    let mut prefix = [0u8; 5];
    read_exact_or_truncated(&mut self.inner, &mut prefix)?;
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let flags = prefix[4];
    if len < TAG_SIZE || len > FRAME_SIZE + TAG_SIZE || flags & !FLAG_LAST != 0 {
      return Err(ArchiveError::CorruptFrame { index });
    }

    let mut ciphertext = vec![0u8; len];
    read_exact_or_truncated(&mut self.inner, &mut ciphertext)?;

    let nonce = frame_nonce(&self.nonce_prefix, index);
    let aad = frame_aad(&self.header, index, flags);
    let plaintext = self
      .cipher
      .decrypt(
        Nonce::from_slice(&nonce),
        Payload {
          msg: &ciphertext,
          aad: &aad,
        },
      )
      .map_err(|_| {
        if index == 0 {
          ArchiveError::InvalidPassword
        } else {
          ArchiveError::CorruptFrame { index }
        }
      })?;

    self.frame = Zeroizing::new(plaintext);
    self.pos = 0;
    self.counter = self.counter.checked_add(1).ok_or(ArchiveError::CorruptFrame { index })?;
    self.last_seen = flags & FLAG_LAST != 0;
    Ok(())
  }

  /// Next record of the stream. After `End`, checks that nothing follows.
  pub fn next_record(&mut self) -> Result<Record, ArchiveError> {
    let record: Record = match rmp_serde::from_read(&mut *self) {
      Ok(record) => record,
      Err(e) => return Err(self.error.take().unwrap_or(ArchiveError::Decode(e))),
    };
    if record == Record::End {
      self.expect_end()?;
    }
    Ok(record)
  }

  fn expect_end(&mut self) -> Result<(), ArchiveError> {
    loop {
      if self.pos < self.frame.len() {
        return Err(ArchiveError::TrailingData);
      }
      if self.last_seen {
        break;
      }
      self.read_frame()?;
    }
    let mut extra = [0u8; 1];
    match self.inner.read(&mut extra)? {
      0 => Ok(()),
      _ => Err(ArchiveError::TrailingData),
    }
  }
}

impl<R: Read> Read for FrameReader<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    while self.pos >= self.frame.len() {
      if self.last_seen {
        return Ok(0);
      }
      if let Err(e) = self.read_frame() {
        let io_err = invalid_data(&e);
        self.error = Some(e);
        return Err(io_err);
      }
    }
    let n = buf.len().min(self.frame.len() - self.pos);
    buf[..n].copy_from_slice(&self.frame[self.pos..self.pos + n]);
    self.pos += n;
    Ok(n)
  }
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ArchiveError> {
  reader.read_exact(buf).map_err(|e| match e.kind() {
    io::ErrorKind::UnexpectedEof => ArchiveError::Truncated,
    _ => ArchiveError::Io(e),
  })
}
