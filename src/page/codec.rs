//! # Page Codec
//!
//! Converts typed pages to and from byte sequences. The serialized form is
//! `[tag byte][variant body]`; the 4-byte length framing around it belongs
//! to the writer, not the codec, so the same codec output serves both the
//! data file and the transaction-intent log.
//!
//! ## Tag Table
//!
//! [`encode_page`] and [`decode_page`] dispatch over [`PageKind`]: the tag
//! byte selects exactly one encode and one decode function. The variant set
//! is closed; an unknown tag on decode is corruption, not extensibility.
//!
//! ## Body Layouts
//!
//! Fixed-width heads are zerocopy little-endian structs with compile-time
//! size assertions; variable parts use the varint encoding. Optional node
//! links serialize as `value + 1` with `0` meaning absent, keeping the
//! common (small) node keys single-byte.
//!
//! ```text
//! UberPage:          [head: revision u64 | previous u64] [root RefRepr]
//! RevisionRootPage:  [head: revision u64 | timestamp u64 | max_record u64]
//!                    [data RefRepr] [slot count] per slot:
//!                    [index_id] [RefRepr] [entry_count]
//! KeyValuePage:      [record count] per record: [key] [len] [bytes]
//! AvlIndexPage:      [root+1] [next_node_key] [node count] per node:
//!                    [node_key] [IndexKey] [ref count] [refs...]
//!                    [left+1] [right+1] [parent+1] [height]
//! ```
//!
//! Container entries are emitted in ascending key order, so equal pages
//! always produce identical bytes and therefore identical hashes.

use std::collections::BTreeMap;

use eyre::{bail, ensure, Result, WrapErr};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::encoding::{get_varint, put_varint};
use crate::index::avltree::AvlNode;
use crate::index::key::IndexKey;
use crate::index::NodeReferences;

use super::reference::{PageReference, RefRepr, REF_REPR_SIZE};
use super::{AvlIndexPage, IndexSlot, KeyValuePage, Page, PageKind, RevisionRootPage, UberPage};

/// Sentinel for an absent previous-uber offset in the serialized head.
const NO_PREVIOUS: u64 = u64::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct UberHead {
    revision_number: U64,
    previous_uber_page_offset: U64,
}

const UBER_HEAD_SIZE: usize = 16;
const _: () = assert!(std::mem::size_of::<UberHead>() == UBER_HEAD_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct RevisionRootHead {
    revision_number: U64,
    commit_timestamp_millis: U64,
    max_record_key: U64,
}

const REVISION_ROOT_HEAD_SIZE: usize = 24;
const _: () = assert!(std::mem::size_of::<RevisionRootHead>() == REVISION_ROOT_HEAD_SIZE);

/// Serializes a page to its tagged byte form.
pub fn encode_page(page: &Page) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(page.kind() as u8);

    match page {
        Page::Uber(uber) => encode_uber(uber, &mut buf)?,
        Page::RevisionRoot(root) => encode_revision_root(root, &mut buf)?,
        Page::KeyValue(kv) => encode_key_value(kv, &mut buf),
        Page::AvlIndex(avl) => encode_avl_index(avl, &mut buf),
    }

    Ok(buf)
}

/// Decodes a page from its tagged byte form.
pub fn decode_page(bytes: &[u8]) -> Result<Page> {
    ensure!(!bytes.is_empty(), "empty buffer for page decode");

    let Some(kind) = PageKind::from_byte(bytes[0]) else {
        bail!("unknown page tag: {:#04x}", bytes[0]);
    };
    let body = &bytes[1..];

    match kind {
        PageKind::Uber => decode_uber(body).wrap_err("failed to decode uber page"),
        PageKind::RevisionRoot => {
            decode_revision_root(body).wrap_err("failed to decode revision-root page")
        }
        PageKind::KeyValue => decode_key_value(body).wrap_err("failed to decode key/value page"),
        PageKind::AvlIndex => decode_avl_index(body).wrap_err("failed to decode AVL index page"),
    }
}

fn encode_uber(uber: &UberPage, buf: &mut Vec<u8>) -> Result<()> {
    let head = UberHead {
        revision_number: U64::new(uber.revision_number),
        previous_uber_page_offset: U64::new(
            uber.previous_uber_page_offset.unwrap_or(NO_PREVIOUS),
        ),
    };
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(uber.root_ref.to_repr()?.as_bytes());
    Ok(())
}

fn decode_uber(body: &[u8]) -> Result<Page> {
    ensure!(
        body.len() >= UBER_HEAD_SIZE + REF_REPR_SIZE,
        "uber page body too short: {}",
        body.len()
    );

    let head = UberHead::ref_from_bytes(&body[..UBER_HEAD_SIZE])
        .map_err(|e| eyre::eyre!("failed to read uber head: {:?}", e))?;
    let root_repr = RefRepr::from_bytes(&body[UBER_HEAD_SIZE..])?;

    let previous = head.previous_uber_page_offset.get();

    Ok(Page::Uber(UberPage {
        revision_number: head.revision_number.get(),
        previous_uber_page_offset: (previous != NO_PREVIOUS).then_some(previous),
        root_ref: PageReference::from_repr(root_repr),
    }))
}

fn encode_revision_root(root: &RevisionRootPage, buf: &mut Vec<u8>) -> Result<()> {
    let head = RevisionRootHead {
        revision_number: U64::new(root.revision_number),
        commit_timestamp_millis: U64::new(root.commit_timestamp_millis),
        max_record_key: U64::new(root.max_record_key),
    };
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(root.data_ref.to_repr()?.as_bytes());

    put_varint(buf, root.index_slots.len() as u64);
    for slot in &root.index_slots {
        put_varint(buf, slot.index_id as u64);
        buf.extend_from_slice(slot.reference.to_repr()?.as_bytes());
        put_varint(buf, slot.entry_count);
    }
    Ok(())
}

fn decode_revision_root(body: &[u8]) -> Result<Page> {
    ensure!(
        body.len() >= REVISION_ROOT_HEAD_SIZE + REF_REPR_SIZE,
        "revision-root body too short: {}",
        body.len()
    );

    let head = RevisionRootHead::ref_from_bytes(&body[..REVISION_ROOT_HEAD_SIZE])
        .map_err(|e| eyre::eyre!("failed to read revision-root head: {:?}", e))?;
    let mut pos = REVISION_ROOT_HEAD_SIZE;

    let data_repr = RefRepr::from_bytes(&body[pos..])?;
    pos += REF_REPR_SIZE;

    let (slot_count, n) = get_varint(&body[pos..])?;
    pos += n;

    // The claimed count is untrusted; cap the preallocation by the bytes
    // that could possibly back it and let the loop error on the shortfall.
    let mut index_slots = Vec::with_capacity((slot_count as usize).min(body.len() - pos));
    for _ in 0..slot_count {
        let (index_id, n) = get_varint(&body[pos..])?;
        pos += n;
        ensure!(index_id <= u32::MAX as u64, "index id out of range: {}", index_id);

        let repr = RefRepr::from_bytes(&body[pos..])?;
        pos += REF_REPR_SIZE;

        let (entry_count, n) = get_varint(&body[pos..])?;
        pos += n;

        index_slots.push(IndexSlot {
            index_id: index_id as u32,
            reference: PageReference::from_repr(repr),
            entry_count,
        });
    }

    Ok(Page::RevisionRoot(RevisionRootPage {
        revision_number: head.revision_number.get(),
        commit_timestamp_millis: head.commit_timestamp_millis.get(),
        max_record_key: head.max_record_key.get(),
        data_ref: PageReference::from_repr(data_repr),
        index_slots,
    }))
}

fn encode_key_value(kv: &KeyValuePage, buf: &mut Vec<u8>) {
    put_varint(buf, kv.len() as u64);
    for (record_key, value) in kv.iter() {
        put_varint(buf, record_key);
        put_varint(buf, value.len() as u64);
        buf.extend_from_slice(value);
    }
}

fn decode_key_value(body: &[u8]) -> Result<Page> {
    let (count, mut pos) = get_varint(body)?;

    let mut page = KeyValuePage::new();
    for _ in 0..count {
        let (record_key, n) = get_varint(&body[pos..])?;
        pos += n;
        let (len, n) = get_varint(&body[pos..])?;
        pos += n;
        // The claimed length is untrusted; compare against the remaining
        // bytes without forming pos + len, which can overflow.
        ensure!(
            len <= (body.len() - pos) as u64,
            "record value length {} exceeds remaining {} bytes",
            len,
            body.len() - pos
        );
        let len = len as usize;
        page.insert(record_key, body[pos..pos + len].to_vec());
        pos += len;
    }

    Ok(Page::KeyValue(page))
}

fn put_opt_node_key(buf: &mut Vec<u8>, link: Option<u64>) {
    put_varint(buf, link.map_or(0, |k| k + 1));
}

fn get_opt_node_key(buf: &[u8]) -> Result<(Option<u64>, usize)> {
    let (raw, n) = get_varint(buf)?;
    Ok((raw.checked_sub(1), n))
}

fn encode_avl_index(avl: &AvlIndexPage, buf: &mut Vec<u8>) {
    put_opt_node_key(buf, avl.root());
    put_varint(buf, avl.next_node_key());
    put_varint(buf, avl.len() as u64);

    for (node_key, node) in avl.iter() {
        put_varint(buf, node_key);
        node.key.encode(buf);

        put_varint(buf, node.value.len() as u64);
        for id in node.value.iter() {
            put_varint(buf, id);
        }

        put_opt_node_key(buf, node.left);
        put_opt_node_key(buf, node.right);
        put_opt_node_key(buf, node.parent);
        buf.push(node.height as u8);
    }
}

fn decode_avl_index(body: &[u8]) -> Result<Page> {
    let (root, mut pos) = get_opt_node_key(body)?;

    let (next_node_key, n) = get_varint(&body[pos..])?;
    pos += n;
    let (count, n) = get_varint(&body[pos..])?;
    pos += n;

    let mut nodes = BTreeMap::new();
    for _ in 0..count {
        let (node_key, n) = get_varint(&body[pos..])?;
        pos += n;

        let (key, n) = IndexKey::decode(&body[pos..])?;
        pos += n;

        let (ref_count, n) = get_varint(&body[pos..])?;
        pos += n;
        // Untrusted count; preallocation capped as in decode_revision_root.
        let mut refs = Vec::with_capacity((ref_count as usize).min(body.len() - pos));
        for _ in 0..ref_count {
            let (id, n) = get_varint(&body[pos..])?;
            pos += n;
            refs.push(id);
        }
        let value = NodeReferences::from_vec(refs);

        let (left, n) = get_opt_node_key(&body[pos..])?;
        pos += n;
        let (right, n) = get_opt_node_key(&body[pos..])?;
        pos += n;
        let (parent, n) = get_opt_node_key(&body[pos..])?;
        pos += n;

        ensure!(body.len() > pos, "truncated AVL node height");
        let height = body[pos] as i8;
        pos += 1;

        nodes.insert(
            node_key,
            AvlNode {
                key,
                value,
                left,
                right,
                parent,
                height,
            },
        );
    }

    ensure!(
        next_node_key > nodes.keys().next_back().copied().unwrap_or(0),
        "next node key {} not above the highest stored node key",
        next_node_key
    );

    Ok(Page::AvlIndex(AvlIndexPage::from_parts(
        root,
        next_node_key,
        nodes,
    )))
}
