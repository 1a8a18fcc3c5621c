//! How letters meet their neighbors.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::geometry::normalize;
use crate::util::FloatKey;

/// A description of how one letter meets an adjacent letter.
///
/// `angle` is the tangent angle at the point of contact; `clockwise` is
/// the turning sense there, if the adjacent shape curves. Both may be
/// absent, signifying no adjacent letter at all; [`Context::NONE`] is
/// the distinguished absent-everywhere value.
#[derive(Clone, Copy, Debug)]
pub struct Context {
    pub angle: Option<f64>,
    pub clockwise: Option<bool>,
    /// Whether the shape exposing this context is minor, like U+1BC06
    /// DUPLOYAN LETTER I as opposed to U+1BC03 DUPLOYAN LETTER T.
    pub minor: bool,
    /// Whether the shape exposing this context may be ignored when
    /// deciding the topography of an orienting sequence.
    pub ignorable_for_topography: bool,
    /// Whether the adjacent shape starts a diphthong ligature.
    pub diphthong_start: bool,
    /// Whether the adjacent shape ends a diphthong ligature.
    pub diphthong_end: bool,
    /// Whether the adjacent shape is U+1BC5B DUPLOYAN LETTER OU, whose
    /// exposed angle is a cusp rather than a smooth tangent.
    pub ou: bool,
}

impl Context {
    /// The context of a schema with no adjacent letter.
    pub const NONE: Context = Context {
        angle: None,
        clockwise: None,
        minor: false,
        ignorable_for_topography: false,
        diphthong_start: false,
        diphthong_end: false,
        ou: false,
    };

    pub const fn new(angle: f64) -> Context {
        Context {
            angle: Some(angle),
            ..Context::NONE
        }
    }

    pub const fn with_clockwise(angle: f64, clockwise: bool) -> Context {
        Context {
            angle: Some(angle),
            clockwise: Some(clockwise),
            ..Context::NONE
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Context::NONE
    }

    pub fn angle(&self) -> Option<f64> {
        self.angle
    }

    /// The same context seen from the other side: the angle is rotated a
    /// half turn and the turning sense is flipped.
    pub fn reversed(&self) -> Context {
        Context {
            angle: self.angle.map(|a| normalize(a + 180.0)),
            clockwise: self.clockwise.map(|c| !c),
            ..*self
        }
    }

    /// Returns whether tracing from this context's angle to `other`'s
    /// angle turns clockwise, i.e. whether two letters joined at these
    /// contexts would form a clockwise loop.
    ///
    /// Both contexts must have angles.
    pub fn has_clockwise_loop_to(&self, other: &Context) -> bool {
        let a = self.angle.expect("context must have an angle");
        let b = other.angle.expect("context must have an angle");
        normalize(a - b) < 180.0
    }

    pub fn clone_with_angle(&self, angle: f64) -> Context {
        Context {
            angle: Some(angle),
            ..*self
        }
    }

    pub fn clone_with_clockwise(&self, clockwise: Option<bool>) -> Context {
        Context { clockwise, ..*self }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::NONE
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.angle.map(FloatKey) == other.angle.map(FloatKey)
            && self.clockwise == other.clockwise
            && self.minor == other.minor
            && self.ignorable_for_topography == other.ignorable_for_topography
            && self.diphthong_start == other.diphthong_start
            && self.diphthong_end == other.diphthong_end
            && self.ou == other.ou
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.angle.map(FloatKey).hash(state);
        self.clockwise.hash(state);
        self.minor.hash(state);
        self.ignorable_for_topography.hash(state);
        self.diphthong_start.hash(state);
        self.diphthong_end.hash(state);
        self.ou.hash(state);
    }
}

/// Renders a context as a token usable in class names and glyph names.
impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.angle {
            None => write!(f, "X")?,
            Some(angle) => {
                let mut s = format!("{angle}");
                if let Some(stripped) = s.strip_suffix(".0") {
                    s = stripped.to_string();
                }
                write!(f, "{}", s.replace(['.', '-'], "n"))?;
            }
        }
        match self.clockwise {
            None => write!(f, "x")?,
            Some(true) => write!(f, "n")?,
            Some(false) => write!(f, "p")?,
        }
        if self.minor {
            write!(f, ".m")?;
        }
        if self.ignorable_for_topography {
            write!(f, ".i")?;
        }
        if self.diphthong_start {
            write!(f, ".d1")?;
        }
        if self.diphthong_end {
            write!(f, ".d2")?;
        }
        if self.ou {
            write!(f, ".ou")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversal_round_trips() {
        let context = Context::with_clockwise(30.0, true);
        assert_eq!(context.reversed().reversed(), context);
        assert_eq!(context.reversed().angle, Some(210.0));
        assert_eq!(context.reversed().clockwise, Some(false));
    }

    #[test]
    fn none_is_none() {
        assert!(Context::NONE.is_none());
        assert!(!Context::new(0.0).is_none());
        assert_eq!(Context::NONE, Context::default());
    }

    #[test]
    fn clockwise_loop() {
        // Exiting east then entering north turns counterclockwise.
        assert!(!Context::new(0.0).has_clockwise_loop_to(&Context::new(90.0)));
        assert!(Context::new(90.0).has_clockwise_loop_to(&Context::new(0.0)));
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(Context::NONE.to_string(), "Xx");
        assert_eq!(Context::with_clockwise(270.0, true).to_string(), "270n");
        assert_eq!(Context::new(46.5).to_string(), "46n5x");
    }
}
