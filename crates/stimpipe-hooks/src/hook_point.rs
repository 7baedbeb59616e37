use std::fmt;

use stimpipe_core::ImagingError;

/// Named stage of the per-window processing pipeline.
///
/// The numbering is fixed; hosts store hook ids as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    CloseOnscreenWindowPreGLShutdown,
    CloseOnscreenWindowPostGLShutdown,
    UserspaceBufferDrawingFinished,
    StereoLeftCompositingBlit,
    StereoRightCompositingBlit,
    StereoCompositingBlit,
    PostCompositingBlit,
    FinalOutputFormattingBlit,
    UserspaceBufferDrawingPrepare,
    IdentityBlitChain,
    LeftFinalizerBlitChain,
    RightFinalizerBlitChain,
    UserDefinedBlit,
    FinalOutputFormattingBlit0,
    FinalOutputFormattingBlit1,
    ScreenFlipImpliedOperations,
    PreSwapbuffersOperations,
}

pub const HOOK_POINT_COUNT: usize = 17;

struct HookInfo {
    name: &'static str,
    synopsis: &'static str,
}

// Indexed by `HookPoint as usize`.
static REGISTRY: [HookInfo; HOOK_POINT_COUNT] = [
    HookInfo {
        name: "CloseOnscreenWindowPreGLShutdown",
        synopsis: "Runs when an onscreen window closes, while its GL context is still alive.",
    },
    HookInfo {
        name: "CloseOnscreenWindowPostGLShutdown",
        synopsis: "Runs after GL teardown of a closing window. Only non-GL work is possible here.",
    },
    HookInfo {
        name: "UserspaceBufferDrawingFinished",
        synopsis: "Runs once user drawing into the draw buffers is done for this frame.",
    },
    HookInfo {
        name: "StereoLeftCompositingBlit",
        synopsis: "Image processing of the mono or left-eye view: input buffer to processed buffer.",
    },
    HookInfo {
        name: "StereoRightCompositingBlit",
        synopsis: "Image processing of the right-eye view: input buffer to processed buffer.",
    },
    HookInfo {
        name: "StereoCompositingBlit",
        synopsis: "Merges both processed views into one image for single-stream stereo modes.",
    },
    HookInfo {
        name: "PostCompositingBlit",
        synopsis: "Reserved for processing of the merged stereo image.",
    },
    HookInfo {
        name: "FinalOutputFormattingBlit",
        synopsis: "Final data conversion right before the image reaches the output framebuffer.",
    },
    HookInfo {
        name: "UserspaceBufferDrawingPrepare",
        synopsis: "Prepares the draw buffers for user drawing after a flip.",
    },
    HookInfo {
        name: "IdentityBlitChain",
        synopsis: "Plain copy from one stage buffer to the next, used when a stage has nothing else to do.",
    },
    HookInfo {
        name: "LeftFinalizerBlitChain",
        synopsis: "Single-pass drawing into the finished left or mono image, e.g. stereo sync lines.",
    },
    HookInfo {
        name: "RightFinalizerBlitChain",
        synopsis: "Single-pass drawing into the finished right image.",
    },
    HookInfo {
        name: "UserDefinedBlit",
        synopsis: "Offline image processing between two textures.",
    },
    HookInfo {
        name: "FinalOutputFormattingBlit0",
        synopsis: "Output conversion for the first window of a dual-window setup.",
    },
    HookInfo {
        name: "FinalOutputFormattingBlit1",
        synopsis: "Output conversion for the second window of a dual-window setup.",
    },
    HookInfo {
        name: "ScreenFlipImpliedOperations",
        synopsis: "Non-GL work implied by every flip, run after the image is finalized.",
    },
    HookInfo {
        name: "PreSwapbuffersOperations",
        synopsis: "Last chance to act immediately before the buffer swap is requested.",
    },
];

impl HookPoint {
    pub const ALL: [HookPoint; HOOK_POINT_COUNT] = [
        HookPoint::CloseOnscreenWindowPreGLShutdown,
        HookPoint::CloseOnscreenWindowPostGLShutdown,
        HookPoint::UserspaceBufferDrawingFinished,
        HookPoint::StereoLeftCompositingBlit,
        HookPoint::StereoRightCompositingBlit,
        HookPoint::StereoCompositingBlit,
        HookPoint::PostCompositingBlit,
        HookPoint::FinalOutputFormattingBlit,
        HookPoint::UserspaceBufferDrawingPrepare,
        HookPoint::IdentityBlitChain,
        HookPoint::LeftFinalizerBlitChain,
        HookPoint::RightFinalizerBlitChain,
        HookPoint::UserDefinedBlit,
        HookPoint::FinalOutputFormattingBlit0,
        HookPoint::FinalOutputFormattingBlit1,
        HookPoint::ScreenFlipImpliedOperations,
        HookPoint::PreSwapbuffersOperations,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    pub fn name(self) -> &'static str {
        REGISTRY[self.index()].name
    }

    pub fn synopsis(self) -> &'static str {
        REGISTRY[self.index()].synopsis
    }

    /// Exact, case-sensitive lookup. A typo is an error, never a silent no-op.
    pub fn from_name(name: &str) -> Result<Self, ImagingError> {
        Self::ALL
            .iter()
            .copied()
            .find(|h| h.name() == name)
            .ok_or_else(|| ImagingError::UnknownHook(name.to_string()))
    }

    /// Finalizer chains only ever run as a single pass, in place.
    pub fn is_single_pass_only(self) -> bool {
        matches!(
            self,
            HookPoint::LeftFinalizerBlitChain | HookPoint::RightFinalizerBlitChain
        )
    }

    /// Chains that run without any GL context or render targets bound.
    pub fn is_non_gl(self) -> bool {
        matches!(
            self,
            HookPoint::CloseOnscreenWindowPostGLShutdown | HookPoint::ScreenFlipImpliedOperations
        )
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Human-readable listing of every hook point with its synopsis.
pub fn list_all_hooks() -> String {
    let mut out = String::new();
    for h in HookPoint::ALL {
        out.push_str(h.name());
        out.push_str("\n    ");
        out.push_str(h.synopsis());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_to_their_points() {
        for (i, h) in HookPoint::ALL.iter().enumerate() {
            assert_eq!(h.index(), i);
            assert_eq!(HookPoint::from_name(h.name()).unwrap(), *h);
        }
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = HookPoint::from_name("StereoCompositingBlt").unwrap_err();
        assert!(matches!(err, ImagingError::UnknownHook(ref n) if n == "StereoCompositingBlt"));
        assert!(HookPoint::from_name("stereocompositingblit").is_err());
    }

    #[test]
    fn listing_mentions_every_hook() {
        let listing = list_all_hooks();
        for h in HookPoint::ALL {
            assert!(listing.contains(h.name()));
        }
    }
}
