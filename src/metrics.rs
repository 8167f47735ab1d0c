// Base-14 Helvetica metrics for text measurement

/// Ascender height in 1/1000 em (Helvetica and Helvetica-Bold share it).
pub const ASCENDER: f64 = 718.0;

/// Descender depth in 1/1000 em (negative, below the baseline).
pub const DESCENDER: f64 = -207.0;

/// Advance widths for ASCII 32..=126 in 1/1000 em, standard AFM values.
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, // space ! " # $ % & ' ( )
    389, 584, 278, 333, 278, 278, 556, 556, 556, 556, // * + , - . / 0 1 2 3
    556, 556, 556, 556, 556, 556, 278, 278, 584, 584, // 4 5 6 7 8 9 : ; < =
    584, 556, 1015, 667, 667, 722, 722, 667, 611, 778, // > ? @ A B C D E F G
    722, 278, 500, 667, 556, 833, 722, 778, 667, 778, // H I J K L M N O P Q
    722, 667, 611, 722, 667, 944, 667, 667, 611, 278, // R S T U V W X Y Z [
    278, 278, 469, 556, 333, 556, 556, 500, 556, 556, // \ ] ^ _ ` a b c d e
    278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // f g h i j k l m n o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, // p q r s t u v w x y
    500, 334, 260, 334, 584, // z { | } ~
];

const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, // space ! " # $ % & ' ( )
    389, 584, 278, 333, 278, 278, 556, 556, 556, 556, // * + , - . / 0 1 2 3
    556, 556, 556, 556, 556, 556, 333, 333, 584, 584, // 4 5 6 7 8 9 : ; < =
    584, 611, 975, 722, 722, 722, 722, 667, 611, 778, // > ? @ A B C D E F G
    722, 278, 556, 722, 611, 833, 722, 778, 667, 778, // H I J K L M N O P Q
    722, 667, 611, 722, 667, 944, 667, 667, 611, 333, // R S T U V W X Y Z [
    278, 333, 584, 556, 333, 556, 611, 556, 611, 556, // \ ] ^ _ ` a b c d e
    333, 611, 611, 278, 278, 556, 278, 889, 611, 611, // f g h i j k l m n o
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, // p q r s t u v w x y
    500, 389, 280, 389, 584, // z { | } ~
];

/// Width of a single character in 1/1000 em, if it has a known metric.
pub fn char_width(ch: char, bold: bool) -> Option<f64> {
    let code = ch as u32;
    if !(32..=126).contains(&code) {
        return None;
    }
    let table = if bold { &HELVETICA_BOLD } else { &HELVETICA };
    Some(f64::from(table[(code - 32) as usize]))
}

/// Width of a single character with a 500-unit fallback for unmapped glyphs.
///
/// Used when reconstructing geometry from a template's content stream, where
/// an approximate advance still locates the run well enough to match on.
pub fn advance(ch: char, bold: bool) -> f64 {
    char_width(ch, bold).unwrap_or(500.0)
}

/// Exact rendered width of `text` at `size` points.
///
/// Returns `None` if any character has no metric; callers placing new text
/// must treat that as an error rather than falling back to an estimate.
pub fn text_width(text: &str, size: f64, bold: bool) -> Option<f64> {
    let mut units = 0.0;
    for ch in text.chars() {
        units += char_width(ch, bold)?;
    }
    Some(units * size / 1000.0)
}

/// Vertical extent of a line at `size` points as (descent, ascent) offsets
/// from the baseline. Descent is negative.
pub fn line_extent(size: f64) -> (f64, f64) {
    (DESCENDER * size / 1000.0, ASCENDER * size / 1000.0)
}
