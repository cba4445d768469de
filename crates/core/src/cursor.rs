/// Shape of the next history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Return the whole history immediately
    Full,
    /// Long-poll until something changes, then return only the changes
    WaitForChanges,
}

impl FetchMode {
    /// Value of the `wait_changes` query parameter.
    pub fn wait_changes_flag(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::WaitForChanges => 1,
        }
    }
}

/// Why the local replica can no longer be trusted to be incremental.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceReason {
    SelectionChanged,
    Resumed,
    ChatSwitch,
    DeletionRequested,
}

impl DivergenceReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SelectionChanged => "selection changed",
            Self::Resumed => "resumed from stale state",
            Self::ChatSwitch => "server reported chat switch",
            Self::DeletionRequested => "deletion awaiting confirmation",
        }
    }
}

impl std::fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides between full and incremental history requests.
///
/// Both public flags derive from one divergence bit: a diverged cursor needs
/// the full history and must not wait for changes; a settled cursor waits
/// for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    diverged: bool,
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self { diverged: true }
    }
}

impl SyncCursor {
    pub fn need_full_history(&self) -> bool {
        self.diverged
    }

    pub fn wait_for_changes(&self) -> bool {
        !self.diverged
    }

    pub fn fetch_mode(&self) -> FetchMode {
        if self.diverged {
            FetchMode::Full
        } else {
            FetchMode::WaitForChanges
        }
    }

    pub fn diverge(&mut self, reason: DivergenceReason) {
        if !self.diverged {
            tracing::debug!("sync cursor diverged: {reason}");
        }
        self.diverged = true;
    }

    /// The replica matches the server as of the last response.
    pub fn settle(&mut self) {
        self.diverged = false;
    }
}
