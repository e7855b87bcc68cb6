//! Forward-only reader over the local entries of a ZIP stream.
//!
//! Only local headers are consulted, so the archive never needs to be
//! seekable. Entries written by streaming writers (general purpose flag bit 3)
//! carry their CRC and sizes in a data descriptor after the compressed data.
//! Deflate and bzip2 data find their own end; stored data is scanned for a
//! signed descriptor whose sizes and CRC match the bytes before it.
//!
//! An entry that is dropped before its end is simply abandoned: nothing more
//! is read from the underlying stream.

use crate::error::ExtractError;
use bzip2::bufread::BzDecoder;
use crc32fast::Hasher;
use flate2::bufread::DeflateDecoder;
use std::io::{self, BufRead, ErrorKind, Read, Take};

const LOCAL_FILE_HEADER: u32 = 0x0403_4b50;
const CENTRAL_DIRECTORY_HEADER: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY: u32 = 0x0605_4b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY: u32 = 0x0606_4b50;
const DATA_DESCRIPTOR: u32 = 0x0807_4b50;

const FLAG_ENCRYPTED: u16 = 1;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const METHOD_BZIP2: u16 = 12;

const ZIP64_EXTRA_FIELD: u16 = 0x0001;
const ZIP64_MARKER: u32 = 0xFFFF_FFFF;

/// Reads ZIP entries one after the other from a buffered stream.
pub struct ZipStreamReader<R> {
    inner: R,
    finished: bool,
}

impl<R: BufRead> ZipStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// Advance to the next entry.
    ///
    /// Returns `None` once the central directory (or, for an empty archive,
    /// the end of central directory record) is reached. The previous entry
    /// must have been read to its end before calling this again.
    pub fn next_entry(&mut self) -> Result<Option<ZipStreamEntry<'_, R>>, ExtractError> {
        if self.finished {
            return Ok(None);
        }

        match read_u32(&mut self.inner).map_err(header_error)? {
            LOCAL_FILE_HEADER => {}
            CENTRAL_DIRECTORY_HEADER | END_OF_CENTRAL_DIRECTORY | ZIP64_END_OF_CENTRAL_DIRECTORY => {
                self.finished = true;
                return Ok(None);
            }
            other => {
                return Err(ExtractError::Corrupted(format!(
                    "unexpected record signature {:#010x}",
                    other
                )))
            }
        }

        let mut fixed = [0u8; 26];
        self.inner.read_exact(&mut fixed).map_err(header_error)?;

        let flags = u16_at(&fixed, 2);
        let method = u16_at(&fixed, 4);
        let crc32 = u32_at(&fixed, 10);
        let mut compressed_size = u64::from(u32_at(&fixed, 14));
        let mut size = u64::from(u32_at(&fixed, 18));
        let name_len = usize::from(u16_at(&fixed, 22));
        let extra_len = usize::from(u16_at(&fixed, 24));

        let mut name = vec![0u8; name_len];
        self.inner.read_exact(&mut name).map_err(header_error)?;
        let name = String::from_utf8_lossy(&name).into_owned();

        let mut extra = vec![0u8; extra_len];
        self.inner.read_exact(&mut extra).map_err(header_error)?;
        let zip64 = apply_zip64_extra(&extra, &mut size, &mut compressed_size);

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(ExtractError::UnsupportedFormat(format!(
                "{}: encrypted entries are not supported",
                name
            )));
        }

        let has_descriptor = flags & FLAG_DATA_DESCRIPTOR != 0;

        // Self-terminating methods find their own end when sizes are deferred
        let limit = if has_descriptor {
            u64::MAX
        } else {
            compressed_size
        };

        let body = match method {
            METHOD_STORED if has_descriptor => {
                EntryBody::Scanned(DescriptorScan::new(&mut self.inner, zip64))
            }
            METHOD_STORED => EntryBody::Stored((&mut self.inner).take(limit)),
            METHOD_DEFLATED => {
                EntryBody::Deflated(DeflateDecoder::new((&mut self.inner).take(limit)))
            }
            METHOD_BZIP2 => EntryBody::Bzip2(BzDecoder::new((&mut self.inner).take(limit))),
            other => {
                return Err(ExtractError::UnsupportedFormat(format!(
                    "{}: compression method {}",
                    name, other
                )))
            }
        };

        Ok(Some(ZipStreamEntry {
            name,
            expected: (!has_descriptor).then_some((crc32, size)),
            zip64,
            body,
            hasher: Hasher::new(),
            read: 0,
            verified: false,
        }))
    }
}

/// Decompressed view of one entry.
///
/// Reaching the end of the entry checks its CRC and size against the local
/// header or the data descriptor; a mismatch surfaces as an
/// `InvalidData` error from `read`.
pub struct ZipStreamEntry<'a, R> {
    name: String,
    /// CRC and size from the local header, `None` when deferred to a descriptor
    expected: Option<(u32, u64)>,
    zip64: bool,
    body: EntryBody<'a, R>,
    hasher: Hasher,
    read: u64,
    verified: bool,
}

impl<R: BufRead> ZipStreamEntry<'_, R> {
    /// Stored path of the entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the entry is a directory (its name ends with `/`).
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Uncompressed size from the local header, if it was recorded there.
    pub fn size(&self) -> Option<u64> {
        self.expected.map(|(_, size)| size)
    }

    /// Read and verify the rest of the entry without keeping it.
    pub fn skip(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    fn finish(&mut self) -> io::Result<()> {
        let framed = match self.body.raw() {
            Some(raw) => Some(match self.expected {
                Some(expected) => {
                    // Anything the decoder left inside the recorded compressed size
                    io::copy(raw, &mut io::sink())?;
                    expected
                }
                None => read_data_descriptor(raw, self.zip64)?,
            }),
            None => None,
        };
        let (crc32, size) = match framed {
            Some(framed) => framed,
            None => self.body.scanned_descriptor()?,
        };
        self.verified = true;

        if self.read != size {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("size mismatch: expected {} bytes, got {}", size, self.read),
            ));
        }

        let actual = self.hasher.clone().finalize();
        if actual != crc32 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("CRC mismatch: expected {:08x}, got {:08x}", crc32, actual),
            ));
        }

        Ok(())
    }
}

impl<R: BufRead> Read for ZipStreamEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.verified || buf.is_empty() {
            return Ok(0);
        }

        let n = self.body.read(buf)?;
        if n == 0 {
            self.finish()?;
            return Ok(0);
        }

        self.hasher.update(&buf[..n]);
        self.read += n as u64;
        Ok(n)
    }
}

enum EntryBody<'a, R> {
    Stored(Take<&'a mut R>),
    Deflated(DeflateDecoder<Take<&'a mut R>>),
    Bzip2(BzDecoder<Take<&'a mut R>>),
    Scanned(DescriptorScan<'a, R>),
}

impl<'a, R: BufRead> EntryBody<'a, R> {
    /// The compressed byte stream underneath the decoder, if bounded by `Take`.
    fn raw(&mut self) -> Option<&mut Take<&'a mut R>> {
        match self {
            EntryBody::Stored(raw) => Some(raw),
            EntryBody::Deflated(decoder) => Some(decoder.get_mut()),
            EntryBody::Bzip2(decoder) => Some(decoder.get_mut()),
            EntryBody::Scanned(_) => None,
        }
    }

    fn scanned_descriptor(&self) -> io::Result<(u32, u64)> {
        match self {
            EntryBody::Scanned(DescriptorScan {
                found: Some(found), ..
            }) => Ok(*found),
            _ => Err(descriptor_missing()),
        }
    }
}

impl<R: BufRead> Read for EntryBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryBody::Stored(raw) => raw.read(buf),
            EntryBody::Deflated(decoder) => decoder.read(buf),
            EntryBody::Bzip2(decoder) => decoder.read(buf),
            EntryBody::Scanned(scan) => scan.read(buf),
        }
    }
}

/// Stored data of unknown length, ended by a signed data descriptor.
///
/// Bytes are taken from the stream only once they are known to be data, or
/// while a possible descriptor is being checked, so nothing past the
/// descriptor is consumed.
struct DescriptorScan<'a, R> {
    inner: &'a mut R,
    /// Bytes taken from `inner` that may start the descriptor
    pending: Vec<u8>,
    descriptor_len: usize,
    zip64: bool,
    hasher: Hasher,
    read: u64,
    found: Option<(u32, u64)>,
}

impl<'a, R: BufRead> DescriptorScan<'a, R> {
    fn new(inner: &'a mut R, zip64: bool) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            descriptor_len: if zip64 { 24 } else { 16 },
            zip64,
            hasher: Hasher::new(),
            read: 0,
            found: None,
        }
    }

    /// CRC and size if `pending` holds a descriptor matching the data so far.
    fn matching_descriptor(&self) -> Option<(u32, u64)> {
        let p = &self.pending;
        if u32_at(p, 0) != DATA_DESCRIPTOR {
            return None;
        }

        let crc32 = u32_at(p, 4);
        let (compressed, size) = if self.zip64 {
            (u64_at(p, 8), u64_at(p, 16))
        } else {
            (u64::from(u32_at(p, 8)), u64::from(u32_at(p, 12)))
        };

        let matches = compressed == self.read
            && size == self.read
            && self.hasher.clone().finalize() == crc32;
        matches.then_some((crc32, size))
    }

    fn emit(&mut self, data: &[u8]) -> usize {
        self.hasher.update(data);
        self.read += data.len() as u64;
        data.len()
    }
}

impl<R: BufRead> Read for DescriptorScan<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.found.is_some() || buf.is_empty() {
            return Ok(0);
        }

        loop {
            if !self.pending.is_empty() {
                if self.pending.len() < self.descriptor_len {
                    let avail = self.inner.fill_buf()?;
                    if avail.is_empty() {
                        return Err(descriptor_missing());
                    }
                    let take = avail.len().min(self.descriptor_len - self.pending.len());
                    self.pending.extend_from_slice(&avail[..take]);
                    self.inner.consume(take);
                    continue;
                }

                if let Some(found) = self.matching_descriptor() {
                    self.found = Some(found);
                    self.pending.clear();
                    return Ok(0);
                }

                // Not the descriptor: data runs at least to the next candidate
                let end = 1 + signature_candidate(&self.pending[1..]);
                let n = end.min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.drain(..n);
                return Ok(self.emit(&buf[..n]));
            }

            let avail = self.inner.fill_buf()?;
            if avail.is_empty() {
                return Err(descriptor_missing());
            }

            let start = signature_candidate(avail);
            if start == 0 {
                let take = avail.len().min(self.descriptor_len);
                self.pending.extend_from_slice(&avail[..take]);
                self.inner.consume(take);
                continue;
            }

            let n = start.min(buf.len());
            buf[..n].copy_from_slice(&avail[..n]);
            self.inner.consume(n);
            return Ok(self.emit(&buf[..n]));
        }
    }
}

/// Offset of the first byte that could begin a descriptor signature
/// (possibly cut off at the end of `bytes`), or `bytes.len()`.
fn signature_candidate(bytes: &[u8]) -> usize {
    let signature = DATA_DESCRIPTOR.to_le_bytes();
    (0..bytes.len())
        .find(|&i| {
            let rest = &bytes[i..];
            let k = rest.len().min(4);
            rest[..k] == signature[..k]
        })
        .unwrap_or(bytes.len())
}

fn descriptor_missing() -> io::Error {
    io::Error::new(ErrorKind::UnexpectedEof, "data descriptor not found")
}

/// Replace 32-bit sizes marked as overflowed with the ZIP64 extra field values.
///
/// Returns whether a ZIP64 extra field is present, which also means the data
/// descriptor (if any) carries 64-bit sizes.
fn apply_zip64_extra(extra: &[u8], size: &mut u64, compressed_size: &mut u64) -> bool {
    let mut rest = extra;
    while rest.len() >= 4 {
        let id = u16_at(rest, 0);
        let len = usize::from(u16_at(rest, 2));
        let data = &rest[4..rest.len().min(4 + len)];

        if id == ZIP64_EXTRA_FIELD {
            let mut fields = data.chunks_exact(8).map(|c| u64_at(c, 0));
            if *size == u64::from(ZIP64_MARKER) {
                if let Some(value) = fields.next() {
                    *size = value;
                }
            }
            if *compressed_size == u64::from(ZIP64_MARKER) {
                if let Some(value) = fields.next() {
                    *compressed_size = value;
                }
            }
            return true;
        }

        rest = &rest[(4 + len).min(rest.len())..];
    }
    false
}

/// CRC and uncompressed size from a data descriptor; the signature is optional.
fn read_data_descriptor<T: Read>(raw: &mut T, zip64: bool) -> io::Result<(u32, u64)> {
    let mut crc32 = read_u32(raw)?;
    if crc32 == DATA_DESCRIPTOR {
        crc32 = read_u32(raw)?;
    }

    let size = if zip64 {
        let _compressed = read_u64(raw)?;
        read_u64(raw)?
    } else {
        let _compressed = read_u32(raw)?;
        u64::from(read_u32(raw)?)
    };

    Ok((crc32, size))
}

fn header_error(e: io::Error) -> ExtractError {
    if e.kind() == ErrorKind::UnexpectedEof {
        ExtractError::Corrupted("unexpected end of archive".to_string())
    } else {
        ExtractError::Io(e)
    }
}

fn read_u32<T: Read + ?Sized>(reader: &mut T) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<T: Read + ?Sized>(reader: &mut T) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    u64::from(u32_at(buf, at)) | (u64::from(u32_at(buf, at + 4)) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    /// Local header for `name` without an extra field.
    fn local_header(name: &str, method: u16, flags: u16, crc: u32, csize: u32, size: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&LOCAL_FILE_HEADER.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&csize.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn end_of_central_directory() -> Vec<u8> {
        let mut out = END_OF_CENTRAL_DIRECTORY.to_le_bytes().to_vec();
        out.extend_from_slice(&[0u8; 18]);
        out
    }

    fn read_all(archive: Vec<u8>) -> Result<Vec<(String, Vec<u8>)>, ExtractError> {
        let mut reader = ZipStreamReader::new(Cursor::new(archive));
        let mut entries = Vec::new();
        while let Some(mut entry) = reader.next_entry()? {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            entries.push((entry.name().to_string(), content));
        }
        Ok(entries)
    }

    #[test]
    fn test_descriptor_with_and_without_signature() {
        let first = b"first entry".repeat(100);
        let second = b"second".to_vec();

        let mut archive = local_header("a.bin", METHOD_DEFLATED, FLAG_DATA_DESCRIPTOR, 0, 0, 0);
        let compressed = deflate(&first);
        archive.extend_from_slice(&compressed);
        archive.extend_from_slice(&DATA_DESCRIPTOR.to_le_bytes());
        archive.extend_from_slice(&crc32fast::hash(&first).to_le_bytes());
        archive.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(first.len() as u32).to_le_bytes());

        archive.extend(local_header("b.bin", METHOD_DEFLATED, FLAG_DATA_DESCRIPTOR, 0, 0, 0));
        let compressed = deflate(&second);
        archive.extend_from_slice(&compressed);
        archive.extend_from_slice(&crc32fast::hash(&second).to_le_bytes());
        archive.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(second.len() as u32).to_le_bytes());
        archive.extend(end_of_central_directory());

        let entries = read_all(archive).unwrap();

        assert_eq!(
            entries,
            vec![("a.bin".to_string(), first), ("b.bin".to_string(), second)]
        );
    }

    #[test]
    fn test_empty_archive_has_no_entries() {
        assert!(read_all(end_of_central_directory()).unwrap().is_empty());
    }

    #[test]
    fn test_crc_mismatch_is_invalid_data() {
        let data = b"payload";
        let mut archive = local_header("x.bin", METHOD_STORED, 0, 0xDEAD_BEEF, 7, 7);
        archive.extend_from_slice(data);
        archive.extend(end_of_central_directory());

        match read_all(archive) {
            Err(ExtractError::Io(e)) => {
                assert_eq!(e.kind(), ErrorKind::InvalidData);
                assert!(e.to_string().contains("CRC mismatch"));
            }
            other => panic!("Expected CRC error, got: {:?}", other),
        }
    }

    fn stored_with_descriptor(name: &str, data: &[u8]) -> Vec<u8> {
        let mut out = local_header(name, METHOD_STORED, FLAG_DATA_DESCRIPTOR, 0, 0, 0);
        out.extend_from_slice(data);
        out.extend_from_slice(&DATA_DESCRIPTOR.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out
    }

    #[test]
    fn test_stored_with_descriptor() {
        // Data that contains the descriptor signature and a truncated copy of it
        let mut tricky = b"header PK\x07\x08 not a descriptor ".repeat(500);
        tricky.extend_from_slice(b"PK\x07");

        let mut archive = stored_with_descriptor("a.bin", &tricky);
        archive.extend(stored_with_descriptor("empty.bin", b""));
        archive.extend(stored_with_descriptor("c.bin", b"tail"));
        archive.extend(end_of_central_directory());

        let entries = read_all(archive).unwrap();

        assert_eq!(
            entries,
            vec![
                ("a.bin".to_string(), tricky),
                ("empty.bin".to_string(), Vec::new()),
                ("c.bin".to_string(), b"tail".to_vec()),
            ]
        );
    }

    #[test]
    fn test_stored_without_descriptor_is_truncated() {
        let mut archive = local_header("x.bin", METHOD_STORED, FLAG_DATA_DESCRIPTOR, 0, 0, 0);
        archive.extend_from_slice(b"data that never ends");

        match read_all(archive) {
            Err(ExtractError::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("Expected truncation, got: {:?}", other),
        }
    }

    #[test]
    fn test_signature_candidate() {
        assert_eq!(signature_candidate(b"abcPK\x07\x08rest"), 3);
        assert_eq!(signature_candidate(b"abcPK"), 3);
        assert_eq!(signature_candidate(b"abcPKx"), 6);
        assert_eq!(signature_candidate(b""), 0);
    }

    #[test]
    fn test_encrypted_and_unknown_methods_are_unsupported() {
        let encrypted = local_header("x.bin", METHOD_DEFLATED, FLAG_ENCRYPTED, 0, 0, 0);
        assert!(matches!(
            read_all(encrypted),
            Err(ExtractError::UnsupportedFormat(_))
        ));

        let lzma = local_header("x.bin", 14, 0, 0, 0, 0);
        match read_all(lzma) {
            Err(ExtractError::UnsupportedFormat(msg)) => assert!(msg.contains("method 14")),
            other => panic!("Expected UnsupportedFormat, got: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_signature_is_corrupted() {
        assert!(matches!(
            read_all(b"not a zip file".to_vec()),
            Err(ExtractError::Corrupted(_))
        ));
    }

    #[test]
    fn test_zip64_extra_field() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&0x5455u16.to_le_bytes());
        extra.extend_from_slice(&1u16.to_le_bytes());
        extra.push(0);
        extra.extend_from_slice(&ZIP64_EXTRA_FIELD.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&5_000_000_000u64.to_le_bytes());
        extra.extend_from_slice(&4_900_000_000u64.to_le_bytes());

        let mut size = u64::from(ZIP64_MARKER);
        let mut compressed = u64::from(ZIP64_MARKER);
        assert!(apply_zip64_extra(&extra, &mut size, &mut compressed));
        assert_eq!(size, 5_000_000_000);
        assert_eq!(compressed, 4_900_000_000);

        let mut small = 10;
        let mut small_compressed = 8;
        assert!(!apply_zip64_extra(&extra[..5], &mut small, &mut small_compressed));
        assert_eq!((small, small_compressed), (10, 8));
    }

    #[test]
    fn test_zip64_descriptor_sizes() {
        let mut descriptor = Vec::new();
        descriptor.extend_from_slice(&DATA_DESCRIPTOR.to_le_bytes());
        descriptor.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        descriptor.extend_from_slice(&3u64.to_le_bytes());
        descriptor.extend_from_slice(&6_000_000_000u64.to_le_bytes());

        let parsed = read_data_descriptor(&mut Cursor::new(descriptor), true).unwrap();

        assert_eq!(parsed, (0x1234_5678, 6_000_000_000));
    }
}
