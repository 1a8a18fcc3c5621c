//! Invisible marker shapes.
//!
//! These shapes have no contours. They exist so that OpenType Layout
//! rules can match on state: contexts, hub candidates, width digits,
//! tree edges, and validation outcomes.

use crate::anchors;
use crate::context::Context;
use crate::glyphs::{AnchorKind, GlyphBuilder};
use crate::util::{FloatKey, GlyphClass, GroupKey, WIDTH_MARKER_PLACES, WIDTH_MARKER_RADIX};

/// The reification of a [`Context`] as a glyph.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextMarker {
    pub is_context_in: bool,
    pub context: Context,
}

impl ContextMarker {
    pub fn name(&self) -> String {
        format!(
            "{}.{}",
            if self.is_context_in { "in" } else { "out" },
            self.context
        )
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new("context_marker").with(self.name())
    }
}

/// A candidate for which letter to place on the baseline.
///
/// Each hub has a priority level; the first hub at the most prominent
/// level in a stenogram defines the baseline. Lower numbers are more
/// prominent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Hub {
    pub priority: i8,
    /// Whether this hub marks a letter after an initial secant, which
    /// attaches through the continuing-overlap anchors instead of the
    /// cursive ones.
    pub initial_secant: bool,
}

impl Hub {
    pub fn new(priority: i8) -> Hub {
        Hub {
            priority,
            initial_secant: false,
        }
    }

    pub fn name(&self) -> String {
        format!(
            "HUB.{}{}",
            self.priority,
            if self.initial_secant { "s" } else { "" }
        )
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder) {
        if self.initial_secant {
            glyph.add_anchor_point(anchors::PRE_HUB_CONTINUING_OVERLAP, AnchorKind::Entry, 0.0, 0.0);
            glyph.add_anchor_point(anchors::POST_HUB_CONTINUING_OVERLAP, AnchorKind::Exit, 0.0, 0.0);
        } else {
            glyph.add_anchor_point(anchors::PRE_HUB_CURSIVE, AnchorKind::Entry, 0.0, 0.0);
            glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Exit, 0.0, 0.0);
        }
    }
}

/// What stage of the width calculation a digit is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DigitStatus {
    #[default]
    Normal,
    /// Only for left-bound digits: the value is final but still needs
    /// to be copied to its final position after the start marker.
    AlmostDone,
    /// The value is final; a visible advance may be derived from it.
    Done,
}

/// One place of a positional-number width encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Digit {
    pub place: usize,
    pub digit: i64,
    pub status: DigitStatus,
}

impl Digit {
    pub fn new(place: usize, digit: i64) -> Digit {
        Digit {
            place,
            digit,
            status: DigitStatus::Normal,
        }
    }

    pub fn with_status(place: usize, digit: i64, status: DigitStatus) -> Digit {
        Digit {
            place,
            digit,
            status,
        }
    }

    pub fn name(&self, prefix: &str) -> String {
        let prefix = if self.status == DigitStatus::Done {
            prefix.to_uppercase()
        } else {
            prefix.to_string()
        };
        let e = if self.status == DigitStatus::Normal {
            'e'
        } else {
            'E'
        };
        format!("{prefix}.{}{e}{}", self.digit, self.place)
    }

    pub fn glyph_class(&self) -> GlyphClass {
        if self.status == DigitStatus::Done {
            GlyphClass::Blocker
        } else {
            GlyphClass::Mark
        }
    }
}

/// Which digit family a width number expands into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DigitKind {
    Entry,
    LeftBound,
    RightBound,
    AnchorWidth,
}

impl DigitKind {
    pub fn letter(self) -> char {
        match self {
            DigitKind::Entry => 'i',
            DigitKind::LeftBound => 'l',
            DigitKind::RightBound => 'r',
            DigitKind::AnchorWidth => 'a',
        }
    }
}

/// An encoded x distance between two of a glyph's anchor points, before
/// expansion into individual digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WidthNumber {
    pub digit_kind: DigitKind,
    pub width: i64,
}

impl WidthNumber {
    pub fn name(&self) -> String {
        format!("{}dx.{}", self.digit_kind.letter(), self.width).replace('-', "n")
    }

    /// The per-place digit values of this number, least significant
    /// place first, two's-complement style in base [`WIDTH_MARKER_RADIX`].
    pub fn to_digit_values(&self) -> [i64; WIDTH_MARKER_PLACES] {
        let mut digits = [0; WIDTH_MARKER_PLACES];
        let mut quotient = self.width;
        for digit in &mut digits {
            let remainder = quotient.rem_euclid(WIDTH_MARKER_RADIX);
            quotient = (quotient - remainder) / WIDTH_MARKER_RADIX;
            *digit = remainder;
        }
        digits
    }
}

/// An edge of an overlap tree.
///
/// The lineage is the path from the root: each step is the child's
/// 1-based index paired with the total number of children at that
/// branch. An empty lineage marks the root itself (only valid for
/// parent edges).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Edge {
    pub lineage: Vec<(usize, usize)>,
}

impl Edge {
    pub fn new(lineage: Vec<(usize, usize)>) -> Edge {
        Edge { lineage }
    }

    pub fn child_name(&self) -> String {
        assert!(!self.lineage.is_empty(), "a child edge lineage may not be empty");
        let indices: Vec<String> = self.lineage.iter().map(|x| x.0.to_string()).collect();
        let totals: Vec<String> = self.lineage[..self.lineage.len() - 1]
            .iter()
            .map(|x| x.1.to_string())
            .collect();
        format!(
            "{}.{}",
            indices.join("_"),
            if self.lineage.len() == 1 {
                "_".to_string()
            } else {
                totals.join("_")
            }
        )
    }

    pub fn parent_name(&self) -> String {
        if self.lineage.is_empty() {
            return "pe.0.0".to_string();
        }
        let indices: Vec<String> = self.lineage.iter().map(|x| x.0.to_string()).collect();
        let totals: Vec<String> = self.lineage.iter().map(|x| x.1.to_string()).collect();
        format!("pe.{}.{}", indices.join("_"), totals.join("_"))
    }

    pub fn draw_child(&self, glyph: &mut GlyphBuilder) {
        let layer_index = self.lineage.len() - 1;
        let child_index = self.lineage.last().unwrap().0 - 1;
        glyph.add_anchor_point(
            anchors::CHILD_EDGES[layer_index.min(1)][child_index],
            AnchorKind::Mark,
            0.0,
            0.0,
        );
        glyph.add_anchor_point(
            anchors::INTER_EDGES[layer_index][child_index],
            AnchorKind::Basemark,
            0.0,
            0.0,
        );
    }

    pub fn draw_parent(&self, glyph: &mut GlyphBuilder) {
        if self.lineage.is_empty() {
            return;
        }
        let layer_index = self.lineage.len() - 1;
        let child_index = self.lineage.last().unwrap().0 - 1;
        glyph.add_anchor_point(anchors::PARENT_EDGE, AnchorKind::Basemark, 0.0, 0.0);
        glyph.add_anchor_point(
            anchors::INTER_EDGES[layer_index][child_index],
            AnchorKind::Mark,
            0.0,
            0.0,
        );
    }
}

/// A space, possibly cursive (a "step" or shim).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Space {
    /// The angle from the cursive entry point to the cursive exit
    /// point.
    pub angle: f64,
    /// Whether to include a margin of one side bearing plus half a
    /// stroke on each side.
    pub margins: bool,
}

impl Space {
    pub fn new(angle: f64) -> Space {
        Space {
            angle,
            margins: false,
        }
    }

    pub fn with_margins(angle: f64) -> Space {
        Space {
            angle,
            margins: true,
        }
    }

    pub fn name(&self, size: f64) -> String {
        if crate::geometry::normalize(self.angle) % 180.0 == 90.0 {
            return String::new();
        }
        let x = (size * self.angle.to_radians().cos()) as i64;
        let y = (size * self.angle.to_radians().sin()) as i64;
        format!("{x}.{y}").replace('-', "n")
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new("space")
            .with_f(self.angle)
            .with(self.margins)
    }

    pub fn hub_priority(&self) -> i8 {
        if crate::geometry::normalize(self.angle) % 180.0 == 90.0 {
            0
        } else {
            -1
        }
    }
}

/// A dot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dot {
    /// The exponent applied to [`Dot::SCALAR`] to scale the nominal
    /// stroke width. A standalone dot is normally scaled up lest it be
    /// hard to see at small sizes.
    pub size_exponent: f64,
}

impl Dot {
    pub const SCALAR: f64 = std::f64::consts::SQRT_2;

    pub fn new() -> Dot {
        Dot { size_exponent: 1.0 }
    }

    pub fn with_size_exponent(size_exponent: f64) -> Dot {
        Dot { size_exponent }
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new("dot").with(crate::util::GroupElt::Float(FloatKey(self.size_exponent)))
    }
}

impl Default for Dot {
    fn default() -> Self {
        Dot::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_number_digits_round_trip() {
        for width in [0, 1, 85, 500, -85, -500, 8191, -8192] {
            let number = WidthNumber {
                digit_kind: DigitKind::RightBound,
                width,
            };
            let digits = number.to_digit_values();
            let mut total = 0i64;
            for (place, digit) in digits.iter().enumerate() {
                let mut digit = *digit;
                // The top place is interpreted as signed.
                if place == WIDTH_MARKER_PLACES - 1 && digit >= WIDTH_MARKER_RADIX / 2 {
                    digit -= WIDTH_MARKER_RADIX;
                }
                total += digit * WIDTH_MARKER_RADIX.pow(place as u32);
            }
            assert_eq!(total, width, "round trip failed for {width}");
        }
    }

    #[test]
    fn digit_names_track_status() {
        assert_eq!(Digit::new(3, 2).name("ldx"), "ldx.2e3");
        assert_eq!(
            Digit::with_status(3, 2, DigitStatus::Done).name("ldx"),
            "LDX.2E3"
        );
    }

    #[test]
    fn edge_names() {
        assert_eq!(Edge::new(vec![(1, 0)]).child_name(), "1._");
        assert_eq!(
            Edge::new(vec![(2, 3), (1, 1), (1, 2)]).child_name(),
            "2_1_1.3_1"
        );
        assert_eq!(Edge::new(vec![]).parent_name(), "pe.0.0");
        assert_eq!(Edge::new(vec![(2, 3)]).parent_name(), "pe.2.3");
    }
}
