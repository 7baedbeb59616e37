use std::fmt::Write as _;

use stimpipe_core::ImagingError;

use crate::entry::{HookEntry, HookKind};
use crate::hook_point::{HookPoint, HOOK_POINT_COUNT};

/// Where a new entry goes in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InsertPosition {
    #[default]
    Prepend,
    Append,
    /// Index from the head; past-the-end clamps to append.
    At(usize),
}

#[derive(Debug, Clone, Default)]
pub struct HookChain {
    pub enabled: bool,
    pub entries: Vec<HookEntry>,
}

/// Result of a slot query.
#[derive(Debug, Clone, Copy)]
pub struct SlotInfo<'a> {
    pub index: usize,
    pub entry: &'a HookEntry,
}

impl SlotInfo<'_> {
    /// How to recreate an equal entry at this position, e.g. `InsertAt2Shader`.
    /// Parses back through `HookCommand::parse`.
    pub fn insert_descriptor(&self) -> String {
        format!("InsertAt{}{}", self.index, self.entry.kind.tag().name())
    }
}

/// Every hook chain of one window. Owned by the window, never shared.
#[derive(Debug, Clone)]
pub struct HookChains {
    chains: Vec<HookChain>,
}

impl Default for HookChains {
    fn default() -> Self {
        Self {
            chains: vec![HookChain::default(); HOOK_POINT_COUNT],
        }
    }
}

impl HookChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(&self, hook: HookPoint) -> &HookChain {
        &self.chains[hook.index()]
    }

    pub fn entries(&self, hook: HookPoint) -> &[HookEntry] {
        &self.chains[hook.index()].entries
    }

    /// Insert an entry and return the index it landed at.
    pub fn add_entry(
        &mut self,
        hook: HookPoint,
        name: impl Into<String>,
        position: InsertPosition,
        kind: HookKind,
    ) -> usize {
        let entries = &mut self.chains[hook.index()].entries;
        let at = match position {
            InsertPosition::Prepend => 0,
            InsertPosition::Append => entries.len(),
            InsertPosition::At(n) => n.min(entries.len()),
        };
        entries.insert(at, HookEntry::new(name, kind));
        at
    }

    /// Remove the entry at `index`; `None` if the chain is shorter.
    pub fn remove_entry(&mut self, hook: HookPoint, index: usize) -> Option<HookEntry> {
        let entries = &mut self.chains[hook.index()].entries;
        (index < entries.len()).then(|| entries.remove(index))
    }

    /// Drop every entry of one chain. The enable flag is left alone.
    pub fn reset(&mut self, hook: HookPoint) {
        self.chains[hook.index()].entries.clear();
    }

    /// Drop every entry of every chain and disable them all.
    pub fn reset_all(&mut self) {
        for c in &mut self.chains {
            c.entries.clear();
            c.enabled = false;
        }
    }

    /// Find a slot by index (token parses as an integer) or else by the first
    /// entry whose name contains `token`.
    pub fn query(&self, hook: HookPoint, token: &str) -> Option<SlotInfo<'_>> {
        let entries = self.entries(hook);
        let index = match token.trim().parse::<usize>() {
            Ok(i) => (i < entries.len()).then_some(i)?,
            Err(_) => entries.iter().position(|e| e.name.contains(token))?,
        };
        Some(SlotInfo {
            index,
            entry: &entries[index],
        })
    }

    /// Replace the configuration string of a queried slot.
    pub fn edit_entry(&mut self, hook: HookPoint, token: &str, config: &str) -> Result<usize, ImagingError> {
        let index = self
            .query(hook, token)
            .map(|s| s.index)
            .ok_or_else(|| ImagingError::Precondition(format!("no slot '{token}' in hook chain '{hook}'")))?;
        self.chains[hook.index()].entries[index]
            .kind
            .set_config(config)?;
        Ok(index)
    }

    pub fn enable(&mut self, hook: HookPoint) {
        self.chains[hook.index()].enabled = true;
    }

    pub fn disable(&mut self, hook: HookPoint) {
        self.chains[hook.index()].enabled = false;
    }

    pub fn is_enabled(&self, hook: HookPoint) -> bool {
        self.chains[hook.index()].enabled
    }

    /// Enabled and non-empty.
    pub fn is_operational(&self, hook: HookPoint) -> bool {
        let c = &self.chains[hook.index()];
        c.enabled && !c.entries.is_empty()
    }

    /// Number of ping-pong markers in a chain.
    pub fn ping_pong_markers(&self, hook: HookPoint) -> usize {
        self.entries(hook)
            .iter()
            .filter(|e| e.kind.is_ping_pong_marker())
            .count()
    }

    pub fn dump(&self, hook: HookPoint) -> String {
        let c = self.chain(hook);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Hook chain '{}' is {}, {} slot(s):",
            hook,
            if c.enabled { "enabled" } else { "disabled" },
            c.entries.len()
        );
        for (i, e) in c.entries.iter().enumerate() {
            let _ = writeln!(out, "  {i}: '{}' : {}", e.name, e.summary());
        }
        out
    }

    pub fn dump_all(&self) -> String {
        HookPoint::ALL.iter().map(|&h| self.dump(h)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKindTag;

    fn builtin(name: &str) -> HookKind {
        HookKind::builtin(name, "").unwrap()
    }

    #[test]
    fn prepend_append_and_clamped_insert() {
        let mut c = HookChains::new();
        let h = HookPoint::StereoLeftCompositingBlit;
        assert_eq!(c.add_entry(h, "b", InsertPosition::Prepend, builtin("IdentityBlit")), 0);
        assert_eq!(c.add_entry(h, "a", InsertPosition::Prepend, builtin("IdentityBlit")), 0);
        assert_eq!(c.add_entry(h, "d", InsertPosition::Append, builtin("IdentityBlit")), 2);
        assert_eq!(c.add_entry(h, "c", InsertPosition::At(2), builtin("FlipFBOs")), 2);
        assert_eq!(c.add_entry(h, "e", InsertPosition::At(99), builtin("IdentityBlit")), 4);
        let names: Vec<_> = c.entries(h).iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d", "e"]);
        assert_eq!(c.ping_pong_markers(h), 1);
    }

    #[test]
    fn remove_beyond_length_is_a_no_op() {
        let mut c = HookChains::new();
        let h = HookPoint::FinalOutputFormattingBlit;
        c.add_entry(h, "x", InsertPosition::Append, builtin("IdentityBlit"));
        assert!(c.remove_entry(h, 5).is_none());
        assert_eq!(c.entries(h).len(), 1);
        assert_eq!(c.remove_entry(h, 0).unwrap().name, "x");
        assert!(c.entries(h).is_empty());
    }

    #[test]
    fn operational_needs_enabled_and_non_empty() {
        let mut c = HookChains::new();
        let h = HookPoint::StereoCompositingBlit;
        c.enable(h);
        assert!(!c.is_operational(h));
        c.add_entry(h, "x", InsertPosition::Append, builtin("IdentityBlit"));
        assert!(c.is_operational(h));
        c.disable(h);
        assert!(!c.is_operational(h));
        c.enable(h);
        c.reset(h);
        assert!(!c.is_operational(h));
        assert!(c.is_enabled(h));
    }

    #[test]
    fn query_by_index_or_substring() {
        let mut c = HookChains::new();
        let h = HookPoint::StereoLeftCompositingBlit;
        c.add_entry(h, "Gamma correction", InsertPosition::Append, builtin("IdentityBlit"));
        c.add_entry(
            h,
            "Blur pass",
            InsertPosition::Append,
            HookKind::shader(7, "Bilinear", 0).unwrap(),
        );
        let s = c.query(h, "1").unwrap();
        assert_eq!(s.entry.name, "Blur pass");
        assert_eq!(s.insert_descriptor(), "InsertAt1Shader");
        let s = c.query(h, "Gamma").unwrap();
        assert_eq!(s.index, 0);
        assert_eq!(s.entry.kind.tag(), EntryKindTag::Builtin);
        assert!(c.query(h, "7").is_none());
        assert!(c.query(h, "Sharpen").is_none());
    }

    #[test]
    fn edit_reparses_config() {
        let mut c = HookChains::new();
        let h = HookPoint::UserDefinedBlit;
        c.add_entry(h, "warp", InsertPosition::Append, HookKind::shader(1, "", 0).unwrap());
        assert_eq!(c.edit_entry(h, "warp", "Offset:3:4").unwrap(), 0);
        assert_eq!(c.entries(h)[0].kind.config_str(), "Offset:3:4");
        assert!(c.edit_entry(h, "nothing", "").is_err());
    }

    #[test]
    fn dump_lists_payloads() {
        let mut c = HookChains::new();
        let h = HookPoint::PreSwapbuffersOperations;
        c.add_entry(h, "notify", InsertPosition::Append, HookKind::runtime("beep()"));
        let d = c.dump(h);
        assert!(d.contains("PreSwapbuffersOperations"));
        assert!(d.contains("disabled"));
        assert!(d.contains("'beep()'"));
        assert!(c.dump_all().contains("IdentityBlitChain"));
    }
}
