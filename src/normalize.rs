//! Pure flattening of a raw block tree into ordered [`BlockRecord`] rows.
//! No I/O happens here; the adapter has already expanded all children.

use serde_json::Value;

use crate::model::{join_rich_text, BlockRecord};
use crate::notion::model::RawBlock;

/// Flatten a block tree depth-first, preserving source order. A parent is
/// always assigned a position before any of its children; the parent's
/// `child_ids` records its direct children in order.
pub fn flatten(page_id: &str, raw_blocks: &[RawBlock]) -> Vec<BlockRecord> {
    let mut out = Vec::new();
    for raw in raw_blocks {
        push_block(page_id, raw, &mut out);
    }
    out
}

fn push_block(page_id: &str, raw: &RawBlock, out: &mut Vec<BlockRecord>) {
    let block = &raw.block;
    let payload = block.payload();
    let text = plain_text(&block.block_type, &payload);
    out.push(BlockRecord {
        id: block.id.clone(),
        page_id: page_id.to_string(),
        block_type: block.block_type.clone(),
        payload,
        child_ids: raw.children.iter().map(|c| c.block.id.clone()).collect(),
        has_children: !raw.children.is_empty(),
        text,
        created_time: block.created_time,
        last_edited_time: block.last_edited_time,
    });
    for child in &raw.children {
        push_block(page_id, child, out);
    }
}

/// Plain-text projection of a block's payload: the concatenated rich-text
/// runs under the type-specific content object. Types without rich text
/// (divider, ...) and unknown types yield an empty string, never an error.
pub fn plain_text(block_type: &str, payload: &Value) -> String {
    let mut text = payload
        .get("rich_text")
        .map(join_rich_text)
        .unwrap_or_default();
    if block_type == "code" {
        // Captions are the only other text a code block carries.
        let caption = payload.get("caption").map(join_rich_text).unwrap_or_default();
        if !caption.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&caption);
        }
    }
    text
}
