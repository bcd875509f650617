//! Block file properties across the public API
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use proptest::prelude::*;
use sdfcache_formats::block::{max_block_file_size, BlockFileBuilder, GlyphBitmap};
use sdfcache_formats::{block_id_for, BlockLayout, CacheKey, PixelFormat, BLOCK_SIZE};
use std::collections::BTreeMap;

fn bitmaps() -> impl Strategy<Value = BTreeMap<u32, Vec<u8>>> {
    proptest::collection::btree_map(
        0..BLOCK_SIZE,
        proptest::collection::vec(any::<u8>(), 0..64),
        0..40,
    )
}

proptest! {
    #[test]
    fn every_built_glyph_is_found(block in 0u32..300, slots in bitmaps(), with_index in any::<bool>()) {
        let glyphs: BTreeMap<u32, Vec<u8>> = slots
            .into_iter()
            .map(|(slot, px)| (block * BLOCK_SIZE + slot, px))
            .collect();

        let mut builder = BlockFileBuilder::new(block).with_index(with_index).with_alignment(4096);
        for (&codepoint, pixels) in &glyphs {
            builder.push(GlyphBitmap {
                codepoint,
                width: 1,
                height: 1,
                bitmap_top: 0,
                bitmap_left: 0,
                pixels,
            }).unwrap();
        }
        let data = builder.build().unwrap();
        prop_assert_eq!(data.len() % 4096, 0);

        let layout = BlockLayout::parse(&data, block).unwrap();
        prop_assert_eq!(layout.entries().len(), glyphs.len());
        for entry in layout.entries() {
            prop_assert_eq!(block_id_for(entry.codepoint), block);
        }
        for (&codepoint, pixels) in &glyphs {
            let entry = layout.find(codepoint).unwrap();
            prop_assert_eq!(layout.payload(&data, entry).unwrap(), pixels.as_slice());
        }
    }
}

#[test]
fn worst_case_block_fits_bound() {
    let key = CacheKey::new(16, 2, PixelFormat::Rgba8);
    let pixels = vec![0xAB; key.max_glyph_bytes()];
    let mut builder = BlockFileBuilder::new(0);
    for codepoint in 0..BLOCK_SIZE {
        builder
            .push(GlyphBitmap {
                codepoint,
                width: 20,
                height: 20,
                bitmap_top: 0,
                bitmap_left: 0,
                pixels: &pixels,
            })
            .unwrap();
    }
    assert_eq!(builder.file_size(), max_block_file_size(&key));
}

#[test]
fn garbage_is_rejected_not_panicking() {
    for len in [0usize, 1, 63, 64, 65, 200, 5000] {
        let data = vec![0x5Au8; len];
        assert!(BlockLayout::parse(&data, 0).is_err());
    }
}
