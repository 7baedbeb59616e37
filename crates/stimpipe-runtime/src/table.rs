use std::fmt::Write as _;

use crate::device::GlDevice;
use crate::fbo::Fbo;

/// Slot index of the system framebuffer pseudo-record.
pub const SYSTEM_SLOT: usize = 0;

/// The window's render targets plus the stage roles pointing into them.
///
/// A role is `None` when unused, or the index of a slot. Two roles holding the
/// same index alias each other: the stage is a zero-copy pass-through.
#[derive(Debug, Clone)]
pub struct FboTable {
    slots: Vec<Fbo>,
    pub draw: [Option<usize>; 2],
    pub input: [Option<usize>; 2],
    /// Slot 2 is the image-processing bounce buffer.
    pub processed: [Option<usize>; 3],
    /// Slots 2 and 3 are bounce buffers of the merge and output stages.
    pub pre_conversion: [Option<usize>; 4],
    pub finalized: [Option<usize>; 2],
}

impl FboTable {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            slots: vec![Fbo::system(width, height)],
            draw: [None; 2],
            input: [None; 2],
            processed: [None; 3],
            pre_conversion: [None; 4],
            finalized: [None; 2],
        }
    }

    pub fn push(&mut self, fbo: Fbo) -> usize {
        self.slots.push(fbo);
        self.slots.len() - 1
    }

    pub fn get(&self, slot: usize) -> Option<&Fbo> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Fbo> {
        self.slots.get_mut(slot)
    }

    pub fn role(&self, slot: Option<usize>) -> Option<&Fbo> {
        slot.and_then(|s| self.slots.get(s))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Real FBOs, i.e. everything but the system pseudo-record.
    pub fn allocated(&self) -> usize {
        self.slots.iter().filter(|f| !f.is_system()).count()
    }

    pub fn system(&self) -> &Fbo {
        &self.slots[SYSTEM_SLOT]
    }

    /// Free every GL object and forget all roles.
    pub fn destroy<D: GlDevice>(&mut self, dev: &mut D) {
        for fbo in self.slots.iter_mut().skip(1) {
            fbo.destroy(dev);
        }
        let (w, h) = (self.slots[SYSTEM_SLOT].width, self.slots[SYSTEM_SLOT].height);
        *self = FboTable::new(w, h);
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        let roles: [(&str, &[Option<usize>]); 5] = [
            ("draw", &self.draw),
            ("input", &self.input),
            ("processed", &self.processed),
            ("pre_conversion", &self.pre_conversion),
            ("finalized", &self.finalized),
        ];
        for (name, slots) in roles {
            let _ = write!(out, "{name}:");
            for s in slots {
                match s {
                    Some(i) => {
                        let f = &self.slots[*i];
                        let _ = write!(out, " [{i}: {}x{} {:?}]", f.width, f.height, f.format);
                    }
                    None => out.push_str(" [-]"),
                }
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_holds_only_the_system_record() {
        let t = FboTable::new(800, 600);
        assert_eq!(t.len(), 1);
        assert_eq!(t.allocated(), 0);
        assert!(t.system().is_system());
        assert_eq!(t.system().width, 800);
        assert!(t.role(t.draw[0]).is_none());
        assert!(t.describe().contains("draw: [-] [-]"));
    }
}
