//! Instructions sent to the hosted models.
//!
//! Every prompt lives here so changing extraction or normalization behaviour
//! means editing exactly one place, and tests can inspect the text directly.
//! Callers can override either instruction through
//! [`crate::config::PipelineConfig::extraction_prompt`] and
//! [`crate::config::PipelineConfig::normalization_prompt`].

/// Instruction for turning a receipt image (or its OCR text) into raw items.
pub const EXTRACTION_PROMPT: &str = r#"Extract all individual item entries from the receipt. Respond only with a JSON array. Each item object must have "name" (string), "price" (number), "quantity" (number), and "unit" (string).

Items with quantities by weight or volume:
- Look for a number directly followed by a unit of weight ("LB", "LBS", "KG", "GR", "G", "OZ") or volume ("ML", "L"), or a count unit ("EA", "CT").
- If an item states such an amount (e.g. "1.5 LB Pickles", "440GR Bread", "12 OZ Soda", "500G Coffee"), set "quantity" to the number (1.5, 440, 12, 500) and "unit" to the unit. Do NOT leave the amount or the unit in "name".
- Discrete items with no unit of measure (e.g. "Milk", "Bread") get "quantity": 1 and "unit": "", unless a count is printed (e.g. "2x Bread" → "quantity": 2).
- If an item is sold "by LB", "by KG", "by OZ" and no amount is printed, set "quantity" to 1 and "unit" to that unit.
- "price" is always the total price of the line.

Example output:
[
  {"name": "Milk", "price": 3.49, "quantity": 1, "unit": ""},
  {"name": "Bread (Wheat)", "price": 2.99, "quantity": 2, "unit": ""},
  {"name": "Pickles", "price": 4.12, "quantity": 1.5, "unit": "lb"},
  {"name": "Bread Lvovsky", "price": 3.69, "quantity": 440, "unit": "gr"},
  {"name": "Coca-Cola", "price": 1.99, "quantity": 12, "unit": "oz"},
  {"name": "Coffee", "price": 8.50, "quantity": 500, "unit": "g"},
  {"name": "Salads Mushroom Carrot", "price": 6.22, "quantity": 1, "unit": "lb"}
]

Output ONLY the JSON array. Do not add any other text and do not wrap it in markdown fences. If no items are found, return an empty array []."#;

/// Instruction for the model normalization pass over a raw item array.
pub const NORMALIZATION_PROMPT: &str = r#"You receive a JSON array of receipt items, each with "name", "price", "quantity" and "unit".

Correct the array:
- Fix spelling errors in item names and convert every name to lowercase.
- OCR often confuses digits with letters inside amounts: "D", "O" or "Q" usually mean 0 and "I", "L" or "|" usually mean 1. For example "44DGR" is 440 gr.
- If a name still contains an amount with a unit (e.g. "bread 440gr"), move the amount to "quantity" and the unit to "unit", and remove both from the name.
- Write units as lowercase abbreviations: lb, kg, gr, g, oz, ml, l, ea, ct. Items without a unit keep "unit": "".
- Do not change prices. Do not add, remove, merge or reorder items.

Maintain the exact JSON structure. Output ONLY the corrected JSON array, with no other text and no markdown fences."#;

/// User message for the text path: OCR output framed for the extractor.
pub fn ocr_text_message(ocr_text: &str) -> String {
    format!("Receipt text (from OCR):\n\n{ocr_text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_states_the_contract() {
        assert!(EXTRACTION_PROMPT.contains("JSON array"));
        assert!(EXTRACTION_PROMPT.contains("empty array []"));
        assert!(EXTRACTION_PROMPT.contains("\"unit\": \"\""));
        assert!(EXTRACTION_PROMPT.contains("by LB"));
    }

    #[test]
    fn normalization_prompt_forbids_reordering() {
        assert!(NORMALIZATION_PROMPT.contains("reorder"));
        assert!(NORMALIZATION_PROMPT.contains("44DGR"));
        assert!(NORMALIZATION_PROMPT.contains("lowercase"));
    }

    #[test]
    fn ocr_message_embeds_text() {
        let msg = ocr_text_message("MILK 3.49");
        assert!(msg.ends_with("MILK 3.49"));
    }
}
