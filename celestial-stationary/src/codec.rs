//! Little-endian binary encoding of exposure and shard catalogs.
//!
//! Exposure catalog (`SRCX`):
//!
//! | Field | Type |
//! |-------|------|
//! | magic | 4 bytes `SRCX` |
//! | format version | u16 |
//! | exposure, chip | u64, u32 |
//! | processing version | u16 length + UTF-8 |
//! | mjd_start, exptime_s | f64, f64 |
//! | footprint | u8 kind, then vertices or pixels |
//! | row count, rows | u32, rows |
//!
//! Shard catalog (`HPXS`): magic, format version, order (u32), pixel (u64),
//! next_hpxid (i64), row count and rows.
//!
//! A row is `ra`, `dec` (f64), `healpix` (u64), `hpxid` (i64), `matches`,
//! `overlaps` (u32), `mid_mjd` (f64) and the dataset identifier as a u16
//! length followed by UTF-8.

use byteorder::{ByteOrder, LittleEndian};
use celestial_xmatch::{Footprint, HealpixRegion, SkyPoint, SphericalPolygon, XmatchError};
use thiserror::Error;

use crate::catalog::{ChipRef, DatasetId, ExposureCatalog, ShardCatalog, SourceRow};

pub const EXPOSURE_MAGIC: [u8; 4] = *b"SRCX";
pub const SHARD_MAGIC: [u8; 4] = *b"HPXS";
pub const FORMAT_VERSION: u16 = 1;

const FOOTPRINT_POLYGON: u8 = 0;
const FOOTPRINT_HEALPIX: u8 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Truncated data: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("Bad magic {found:?}, expected {expected:?}")]
    BadMagic { found: [u8; 4], expected: [u8; 4] },

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("{0} trailing bytes after catalog")]
    TrailingBytes(usize),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unknown footprint kind {0}")]
    UnknownFootprintKind(u8),

    #[error("Length {0} does not fit the length prefix")]
    TooLong(usize),

    #[error("Invalid footprint: {0}")]
    Footprint(#[from] XmatchError),
}

pub type CodecResult<T> = Result<T, CodecError>;

pub fn encode_exposure(catalog: &ExposureCatalog) -> CodecResult<Vec<u8>> {
    let mut w = Writer::with_capacity(64 + catalog.rows.len() * 64);
    w.bytes(&EXPOSURE_MAGIC);
    w.u16(FORMAT_VERSION);
    w.u64(catalog.chip.exposure);
    w.u32(catalog.chip.chip);
    w.string(&catalog.version)?;
    w.f64(catalog.mjd_start);
    w.f64(catalog.exptime_s);
    write_footprint(&mut w, &catalog.footprint)?;
    write_rows(&mut w, &catalog.rows)?;
    Ok(w.finish())
}

pub fn decode_exposure(bytes: &[u8]) -> CodecResult<ExposureCatalog> {
    let mut r = Reader::new(bytes);
    r.header(EXPOSURE_MAGIC)?;
    let exposure = r.u64()?;
    let chip = r.u32()?;
    let version = r.string()?;
    let mjd_start = r.f64()?;
    let exptime_s = r.f64()?;
    let footprint = read_footprint(&mut r)?;
    let rows = read_rows(&mut r)?;
    r.finish()?;

    Ok(ExposureCatalog {
        chip: ChipRef::new(exposure, chip),
        version,
        mjd_start,
        exptime_s,
        footprint,
        rows,
    })
}

/// Encode a shard. The storage generation is not part of the payload.
pub fn encode_shard(shard: &ShardCatalog) -> CodecResult<Vec<u8>> {
    let mut w = Writer::with_capacity(32 + shard.rows.len() * 64);
    w.bytes(&SHARD_MAGIC);
    w.u16(FORMAT_VERSION);
    w.u32(shard.order);
    w.u64(shard.pixel);
    w.i64(shard.next_hpxid);
    write_rows(&mut w, &shard.rows)?;
    Ok(w.finish())
}

pub fn decode_shard(bytes: &[u8]) -> CodecResult<ShardCatalog> {
    let mut r = Reader::new(bytes);
    r.header(SHARD_MAGIC)?;
    let order = r.u32()?;
    let pixel = r.u64()?;
    let next_hpxid = r.i64()?;
    let rows = read_rows(&mut r)?;
    r.finish()?;

    Ok(ShardCatalog {
        pixel,
        order,
        next_hpxid,
        rows,
        generation: None,
    })
}

fn write_footprint(w: &mut Writer, footprint: &Footprint) -> CodecResult<()> {
    match footprint {
        Footprint::Polygon(polygon) => {
            w.u8(FOOTPRINT_POLYGON);
            w.len(polygon.vertices().len())?;
            for v in polygon.vertices() {
                w.f64(v.ra);
                w.f64(v.dec);
            }
        }
        Footprint::Healpix(region) => {
            w.u8(FOOTPRINT_HEALPIX);
            w.u32(region.order());
            w.len(region.pixels().len())?;
            for &pixel in region.pixels() {
                w.u64(pixel);
            }
        }
    }
    Ok(())
}

fn read_footprint(r: &mut Reader<'_>) -> CodecResult<Footprint> {
    match r.u8()? {
        FOOTPRINT_POLYGON => {
            let n = r.count(16)?;
            let mut vertices = Vec::with_capacity(n);
            for _ in 0..n {
                let ra = r.f64()?;
                let dec = r.f64()?;
                vertices.push(SkyPoint::new(ra, dec));
            }
            Ok(SphericalPolygon::new(vertices)?.into())
        }
        FOOTPRINT_HEALPIX => {
            let order = r.u32()?;
            let n = r.count(8)?;
            let mut pixels = Vec::with_capacity(n);
            for _ in 0..n {
                pixels.push(r.u64()?);
            }
            Ok(HealpixRegion::new(order, pixels)?.into())
        }
        kind => Err(CodecError::UnknownFootprintKind(kind)),
    }
}

fn write_rows(w: &mut Writer, rows: &[SourceRow]) -> CodecResult<()> {
    w.len(rows.len())?;
    for row in rows {
        w.f64(row.ra);
        w.f64(row.dec);
        w.u64(row.healpix);
        w.i64(row.hpxid);
        w.u32(row.matches);
        w.u32(row.overlaps);
        w.f64(row.mid_mjd);
        w.string(row.dataset.as_str())?;
    }
    Ok(())
}

const MIN_ROW_BYTES: usize = 8 * 5 + 4 * 2 + 2;

fn read_rows(r: &mut Reader<'_>) -> CodecResult<Vec<SourceRow>> {
    let n = r.count(MIN_ROW_BYTES)?;
    let mut rows = Vec::with_capacity(n);
    for _ in 0..n {
        rows.push(SourceRow {
            ra: r.f64()?,
            dec: r.f64()?,
            healpix: r.u64()?,
            hpxid: r.i64()?,
            matches: r.u32()?,
            overlaps: r.u32()?,
            mid_mjd: r.f64()?,
            dataset: DatasetId::from(r.string()?),
        });
    }
    Ok(rows)
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, v);
        self.bytes(&b);
    }

    fn u32(&mut self, v: u32) {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.bytes(&b);
    }

    fn u64(&mut self, v: u64) {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, v);
        self.bytes(&b);
    }

    fn i64(&mut self, v: i64) {
        let mut b = [0u8; 8];
        LittleEndian::write_i64(&mut b, v);
        self.bytes(&b);
    }

    fn f64(&mut self, v: f64) {
        let mut b = [0u8; 8];
        LittleEndian::write_f64(&mut b, v);
        self.bytes(&b);
    }

    fn len(&mut self, n: usize) -> CodecResult<()> {
        let n = u32::try_from(n).map_err(|_| CodecError::TooLong(n))?;
        self.u32(n);
        Ok(())
    }

    fn string(&mut self, s: &str) -> CodecResult<()> {
        let n = u16::try_from(s.len()).map_err(|_| CodecError::TooLong(s.len()))?;
        self.u16(n);
        self.bytes(s.as_bytes());
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(CodecError::Truncated {
                offset: self.offset,
                needed: n,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn header(&mut self, expected: [u8; 4]) -> CodecResult<()> {
        let mut found = [0u8; 4];
        found.copy_from_slice(self.take(4)?);
        if found != expected {
            return Err(CodecError::BadMagic { found, expected });
        }
        match self.u16()? {
            FORMAT_VERSION => Ok(()),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }

    fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CodecResult<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> CodecResult<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn u64(&mut self) -> CodecResult<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn i64(&mut self) -> CodecResult<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    fn f64(&mut self) -> CodecResult<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    /// Element count, checked against the bytes left so a corrupt count
    /// cannot trigger a huge allocation.
    fn count(&mut self, min_element_bytes: usize) -> CodecResult<usize> {
        let n = self.u32()? as usize;
        let needed = n.saturating_mul(min_element_bytes);
        if needed > self.bytes.len() - self.offset {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed,
            });
        }
        Ok(n)
    }

    fn string(&mut self) -> CodecResult<String> {
        let n = self.u16()? as usize;
        let raw = self.take(n)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn finish(self) -> CodecResult<()> {
        match self.bytes.len() - self.offset {
            0 => Ok(()),
            extra => Err(CodecError::TrailingBytes(extra)),
        }
    }
}
