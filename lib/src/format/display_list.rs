use std::io::Cursor;

use binrw::{BinReaderExt, Endian};
use zerocopy::BigEndian;

use crate::{
    format::{version::DL_INFO_STRIDE_CANDIDATES, Aabb, CAABoxS16},
    util::read::{read_u16, read_u32, read_u8, slice_at},
};

/// Consecutive invalid entries treated as trailing table padding.
const MAX_INVALID_RUN: usize = 8;

const BBOX_OFFSET: usize = 0x06;
const SPECIAL_OFFSET: usize = 0x14;
const SORT_LAYER_OFFSET: usize = 0x18;

/// One row of the display-list table.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DisplayListInfo {
    /// File-relative offset
    pub offset: usize,
    pub size: usize,
    pub bbox: Option<CAABoxS16>,
    /// Bit address in the pass 0 command stream of fur/water variants
    pub special_bit_addr: Option<usize>,
    pub sort_layer: Option<u8>,
}

impl DisplayListInfo {
    /// Invalid rows are kept as zero/zero sentinels so stream indices stay valid.
    #[inline]
    pub fn is_sentinel(&self) -> bool { self.offset == 0 || self.size == 0 }

    /// Display-list bytes, or an empty slice for sentinels.
    pub fn data<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        if self.is_sentinel() {
            return &[];
        }
        data.get(self.offset..self.offset + self.size).unwrap_or(&[])
    }
}

#[derive(Clone, Debug, Default)]
pub struct DisplayListTable {
    pub entries: Vec<DisplayListInfo>,
    pub stride: usize,
}

impl DisplayListTable {
    #[inline]
    pub fn get(&self, index: usize) -> Option<&DisplayListInfo> { self.entries.get(index) }

    pub fn valid_count(&self) -> usize { self.entries.iter().filter(|e| !e.is_sentinel()).count() }

    pub fn bounds(&self) -> Option<Aabb> {
        self.entries
            .iter()
            .filter_map(|e| e.bbox)
            .map(Aabb::from)
            .reduce(Aabb::union)
    }
}

fn read_entry(
    data: &[u8],
    offset: usize,
    stride: usize,
    is_map_block: bool,
) -> Option<DisplayListInfo> {
    let record = slice_at(data, offset, stride).ok()?;
    let dl_offset = read_u32::<BigEndian>(record, 0).ok()? as usize;
    let dl_size = read_u16::<BigEndian>(record, 4).ok()? as usize;
    if dl_offset == 0 || dl_size == 0 || dl_offset.checked_add(dl_size)? > data.len() {
        return None;
    }
    let bbox = if stride >= BBOX_OFFSET + 12 {
        let mut reader = Cursor::new(&record[BBOX_OFFSET..]);
        let bbox: CAABoxS16 = reader.read_type(Endian::Big).ok()?;
        (!bbox.is_zero()).then_some(bbox)
    } else {
        None
    };
    let special_bit_addr = if stride >= SPECIAL_OFFSET + 4 {
        Some(read_u16::<BigEndian>(record, SPECIAL_OFFSET).ok()? as usize).filter(|&a| a != 0)
    } else {
        None
    };
    let sort_layer = if is_map_block && stride >= SORT_LAYER_OFFSET + 4 {
        Some(read_u8(record, SORT_LAYER_OFFSET).ok()?)
    } else {
        None
    };
    Some(DisplayListInfo { offset: dl_offset, size: dl_size, bbox, special_bit_addr, sort_layer })
}

fn resolve_with_stride(
    data: &[u8],
    table_offset: usize,
    count: usize,
    stride: usize,
    is_map_block: bool,
) -> DisplayListTable {
    let mut entries = Vec::with_capacity(count);
    let mut invalid_run = 0;
    for i in 0..count {
        match read_entry(data, table_offset + i * stride, stride, is_map_block) {
            Some(entry) => {
                invalid_run = 0;
                entries.push(entry);
            }
            None => {
                invalid_run += 1;
                entries.push(DisplayListInfo::default());
                if invalid_run >= MAX_INVALID_RUN {
                    log::debug!("Display list table ends in padding at entry {i} of {count}");
                    break;
                }
            }
        }
    }
    entries.resize(count, DisplayListInfo::default());
    DisplayListTable { entries, stride }
}

/// Reads the display-list table.
///
/// With no known stride, each candidate is tried and the one yielding the most valid
/// rows wins (earlier candidates win ties). Never fails: unreadable rows become
/// sentinels.
pub fn resolve_table(
    data: &[u8],
    table_offset: usize,
    count: usize,
    stride: Option<usize>,
    is_map_block: bool,
) -> DisplayListTable {
    if let Some(stride) = stride {
        return resolve_with_stride(data, table_offset, count, stride, is_map_block);
    }
    let mut best: Option<DisplayListTable> = None;
    for stride in DL_INFO_STRIDE_CANDIDATES {
        let table = resolve_with_stride(data, table_offset, count, stride, is_map_block);
        log::trace!("Display list stride {stride:#x}: {} valid of {count}", table.valid_count());
        if best.as_ref().map_or(true, |b| table.valid_count() > b.valid_count()) {
            best = Some(table);
        }
    }
    best.unwrap_or_default()
}
