//! Timetable view-model: the 5x6 grid for a selected user plus the add and
//! remove dialogs.
//!
//! DESIGN
//! ======
//! `TimetableState::apply` is a pure transition from an event to at most
//! one effect. `TimetableViewModel` performs effects against a
//! `TimetableApi` and feeds the results back in as events.
//!
//! Nothing is mutated optimistically. Every add or remove round-trips to
//! the server and is followed by a full snapshot re-fetch, so the grid is
//! always either the last snapshot fetched for the selected user or empty.
//!
//! STALE RESPONSES
//! ===============
//! Each fetch is stamped with a token from a monotonic counter. A snapshot
//! response is applied only if its token is the latest one issued and its
//! user is still selected. Candidate lists and mutation results are
//! checked against the token of the dialog that asked for them, so a late
//! result never closes a dialog opened afterwards.

#[cfg(test)]
#[path = "timetable_test.rs"]
mod timetable_test;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::net::api::TimetableApi;
use crate::net::error::ApiError;
use crate::net::types::{Lecture, LectureId, Slot, TimetableSnapshot, User, UserId};

// =============================================================================
// STATE
// =============================================================================

/// What the grid currently shows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GridView {
    /// No user selected, or the selected user's first fetch is pending.
    #[default]
    NotLoaded,
    Loaded(TimetableSnapshot),
    /// The last fetch failed; nothing is shown.
    Unavailable,
}

impl GridView {
    #[must_use]
    pub fn snapshot(&self) -> Option<&TimetableSnapshot> {
        match self {
            Self::Loaded(snapshot) => Some(snapshot),
            Self::NotLoaded | Self::Unavailable => None,
        }
    }
}

/// Lecture picker for one slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddDialog {
    pub slot: Slot,
    pub query: String,
    pub candidates: Vec<Lecture>,
    pub loading: bool,
    pub chosen: Option<LectureId>,
    pub submitting: bool,
    token: u64,
}

impl AddDialog {
    /// Candidates matching the current query.
    #[must_use]
    pub fn visible(&self) -> Vec<&Lecture> {
        self.candidates
            .iter()
            .filter(|lecture| lecture.matches_query(&self.query))
            .collect()
    }
}

/// Confirmation step before removing a lecture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoveDialog {
    pub slot: Slot,
    pub lecture: Lecture,
    pub submitting: bool,
    token: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TimetableState {
    users: Vec<User>,
    me: Option<UserId>,
    selected: Option<UserId>,
    grid: GridView,
    loading: bool,
    next_token: u64,
    snapshot_token: u64,
    add_dialog: Option<AddDialog>,
    remove_dialog: Option<RemoveDialog>,
}

// =============================================================================
// EVENTS AND EFFECTS
// =============================================================================

#[derive(Debug)]
pub enum TimetableEvent {
    UsersLoaded(Vec<User>),
    /// Result of the session lookup; selects the own user when known.
    SessionResolved(Option<UserId>),
    SelectUser(Option<UserId>),
    Reload,
    SnapshotLoaded { token: u64, user: UserId, result: Result<TimetableSnapshot, ApiError> },
    OpenAddDialog(Slot),
    CandidatesLoaded { token: u64, result: Result<Vec<Lecture>, ApiError> },
    SetQuery(String),
    ChooseLecture(LectureId),
    CancelAdd,
    ConfirmAdd,
    AddFinished { token: u64, user: UserId, slot: Slot, result: Result<(), ApiError> },
    RequestRemove(Slot),
    CancelRemove,
    ConfirmRemove,
    RemoveFinished { token: u64, user: UserId, slot: Slot, result: Result<(), ApiError> },
}

/// Network work requested by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimetableEffect {
    FetchSnapshot { token: u64, user: UserId },
    FetchCandidates { token: u64, slot: Slot },
    /// `token` identifies the add dialog that confirmed the request.
    AddLecture { token: u64, user: UserId, slot: Slot, lecture: LectureId },
    /// `token` identifies the remove dialog that confirmed the request.
    RemoveLecture { token: u64, user: UserId, slot: Slot },
}

// =============================================================================
// TRANSITIONS
// =============================================================================

impl TimetableState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    #[must_use]
    pub fn me(&self) -> Option<UserId> {
        self.me
    }

    #[must_use]
    pub fn selected(&self) -> Option<UserId> {
        self.selected
    }

    #[must_use]
    pub fn grid(&self) -> &GridView {
        &self.grid
    }

    /// `true` while a snapshot fetch for the selection is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn add_dialog(&self) -> Option<&AddDialog> {
        self.add_dialog.as_ref()
    }

    #[must_use]
    pub fn remove_dialog(&self) -> Option<&RemoveDialog> {
        self.remove_dialog.as_ref()
    }

    /// Whether edit controls should be shown. The server still decides
    /// whether a mutation is allowed.
    #[must_use]
    pub fn can_edit(&self) -> bool {
        self.me.is_some() && self.me == self.selected
    }

    /// Apply one event. Returns the network effect to perform, if any.
    #[must_use]
    pub fn apply(&mut self, event: TimetableEvent) -> Option<TimetableEffect> {
        match event {
            TimetableEvent::UsersLoaded(users) => {
                self.users = users;
                None
            }
            TimetableEvent::SessionResolved(me) => {
                self.me = me;
                me.and_then(|user| self.select(Some(user)))
            }
            TimetableEvent::SelectUser(user) => self.select(user),
            TimetableEvent::Reload => self.reload(),
            TimetableEvent::SnapshotLoaded { token, user, result } => {
                self.snapshot_loaded(token, user, result);
                None
            }
            TimetableEvent::OpenAddDialog(slot) => self.open_add_dialog(slot),
            TimetableEvent::CandidatesLoaded { token, result } => {
                self.candidates_loaded(token, result);
                None
            }
            TimetableEvent::SetQuery(query) => {
                if let Some(dialog) = self.add_dialog.as_mut() {
                    dialog.query = query;
                }
                None
            }
            TimetableEvent::ChooseLecture(lecture) => {
                if let Some(dialog) = self.add_dialog.as_mut() {
                    if dialog.candidates.iter().any(|c| c.id == lecture) {
                        dialog.chosen = Some(lecture);
                    }
                }
                None
            }
            TimetableEvent::CancelAdd => {
                self.add_dialog = None;
                None
            }
            TimetableEvent::ConfirmAdd => self.confirm_add(),
            TimetableEvent::AddFinished { token, user, slot, result } => {
                if self.add_dialog.as_ref().is_some_and(|d| d.token == token) {
                    self.add_dialog = None;
                }
                self.mutation_finished("add", user, slot, result)
            }
            TimetableEvent::RequestRemove(slot) => {
                self.request_remove(slot);
                None
            }
            TimetableEvent::CancelRemove => {
                self.remove_dialog = None;
                None
            }
            TimetableEvent::ConfirmRemove => self.confirm_remove(),
            TimetableEvent::RemoveFinished { token, user, slot, result } => {
                if self.remove_dialog.as_ref().is_some_and(|d| d.token == token) {
                    self.remove_dialog = None;
                }
                self.mutation_finished("remove", user, slot, result)
            }
        }
    }

    fn issue_token(&mut self) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        self.next_token
    }

    fn select(&mut self, user: Option<UserId>) -> Option<TimetableEffect> {
        if user != self.selected {
            self.grid = GridView::NotLoaded;
            self.add_dialog = None;
            self.remove_dialog = None;
        }
        self.selected = user;
        if user.is_none() {
            // Invalidate anything still in flight for the previous selection.
            self.snapshot_token = self.issue_token();
            self.loading = false;
            return None;
        }
        self.reload()
    }

    fn reload(&mut self) -> Option<TimetableEffect> {
        let user = self.selected?;
        let token = self.issue_token();
        self.snapshot_token = token;
        self.loading = true;
        Some(TimetableEffect::FetchSnapshot { token, user })
    }

    fn snapshot_loaded(&mut self, token: u64, user: UserId, result: Result<TimetableSnapshot, ApiError>) {
        if token != self.snapshot_token || Some(user) != self.selected {
            debug!(%user, token, current = self.snapshot_token, "discarding stale timetable response");
            return;
        }
        self.loading = false;
        self.grid = match result {
            Ok(snapshot) => GridView::Loaded(snapshot),
            Err(error) => {
                warn!(%user, %error, code = error.error_code(), retryable = error.retryable(), "timetable fetch failed");
                GridView::Unavailable
            }
        };
    }

    fn open_add_dialog(&mut self, slot: Slot) -> Option<TimetableEffect> {
        let token = self.issue_token();
        self.remove_dialog = None;
        self.add_dialog = Some(AddDialog {
            slot,
            query: String::new(),
            candidates: Vec::new(),
            loading: true,
            chosen: None,
            submitting: false,
            token,
        });
        Some(TimetableEffect::FetchCandidates { token, slot })
    }

    fn candidates_loaded(&mut self, token: u64, result: Result<Vec<Lecture>, ApiError>) {
        let Some(dialog) = self.add_dialog.as_mut().filter(|d| d.token == token) else {
            debug!(token, "discarding stale candidate list");
            return;
        };
        dialog.loading = false;
        dialog.candidates = match result {
            Ok(lectures) => lectures,
            Err(error) => {
                warn!(slot = %dialog.slot, %error, "candidate lecture fetch failed");
                Vec::new()
            }
        };
    }

    fn confirm_add(&mut self) -> Option<TimetableEffect> {
        let user = self.selected?;
        let dialog = self.add_dialog.as_mut().filter(|d| !d.submitting)?;
        let lecture = dialog.chosen?;
        dialog.submitting = true;
        Some(TimetableEffect::AddLecture { token: dialog.token, user, slot: dialog.slot, lecture })
    }

    fn request_remove(&mut self, slot: Slot) {
        let Some(lecture) = self.grid.snapshot().and_then(|s| s.cell(slot)).cloned() else {
            debug!(%slot, "remove requested for empty slot");
            return;
        };
        let token = self.issue_token();
        self.add_dialog = None;
        self.remove_dialog = Some(RemoveDialog { slot, lecture, submitting: false, token });
    }

    fn confirm_remove(&mut self) -> Option<TimetableEffect> {
        let user = self.selected?;
        let dialog = self.remove_dialog.as_mut().filter(|d| !d.submitting)?;
        dialog.submitting = true;
        Some(TimetableEffect::RemoveLecture { token: dialog.token, user, slot: dialog.slot })
    }

    fn mutation_finished(
        &mut self,
        action: &'static str,
        user: UserId,
        slot: Slot,
        result: Result<(), ApiError>,
    ) -> Option<TimetableEffect> {
        match result {
            Ok(()) => {
                info!(action, %user, %slot, "timetable updated");
                if Some(user) == self.selected { self.reload() } else { None }
            }
            Err(error) => {
                warn!(
                    action,
                    %user,
                    %slot,
                    %error,
                    code = error.error_code(),
                    retryable = error.retryable(),
                    "timetable mutation failed"
                );
                None
            }
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Runs `TimetableState` effects against the API.
pub struct TimetableViewModel {
    api: Arc<dyn TimetableApi>,
    state: TimetableState,
}

impl TimetableViewModel {
    #[must_use]
    pub fn new(api: Arc<dyn TimetableApi>) -> Self {
        Self { api, state: TimetableState::new() }
    }

    #[must_use]
    pub fn state(&self) -> &TimetableState {
        &self.state
    }

    /// Apply an event without performing its effect. Pair with
    /// [`TimetableViewModel::perform`] and [`TimetableViewModel::dispatch`]
    /// to interleave requests.
    #[must_use]
    pub fn apply(&mut self, event: TimetableEvent) -> Option<TimetableEffect> {
        self.state.apply(event)
    }

    /// Apply an event and run effects until the state settles.
    pub async fn dispatch(&mut self, event: TimetableEvent) {
        let mut next = self.state.apply(event);
        while let Some(effect) = next {
            let outcome = self.perform(effect).await;
            next = self.state.apply(outcome);
        }
    }

    /// Perform one effect and return the event carrying its result.
    pub async fn perform(&self, effect: TimetableEffect) -> TimetableEvent {
        match effect {
            TimetableEffect::FetchSnapshot { token, user } => {
                let result = self.api.fetch_timetable(user).await;
                TimetableEvent::SnapshotLoaded { token, user, result }
            }
            TimetableEffect::FetchCandidates { token, slot } => {
                let result = self.api.available_lectures(slot).await;
                TimetableEvent::CandidatesLoaded { token, result }
            }
            TimetableEffect::AddLecture { token, user, slot, lecture } => {
                let result = self.api.add_lecture(user, slot, lecture).await;
                TimetableEvent::AddFinished { token, user, slot, result }
            }
            TimetableEffect::RemoveLecture { token, user, slot } => {
                let result = self.api.remove_lecture(user, slot).await;
                TimetableEvent::RemoveFinished { token, user, slot, result }
            }
        }
    }

    /// Load the user list, then select the session's own user if signed in.
    pub async fn initialize(&mut self) {
        match self.api.list_users().await {
            Ok(users) => self.dispatch(TimetableEvent::UsersLoaded(users)).await,
            Err(error) => warn!(%error, "user list fetch failed"),
        }
        let me = match self.api.current_user().await {
            Ok(user) => user.map(|u| u.id),
            Err(error) => {
                warn!(%error, "session lookup failed");
                None
            }
        };
        self.dispatch(TimetableEvent::SessionResolved(me)).await;
    }

    pub async fn select_user(&mut self, user: Option<UserId>) {
        self.dispatch(TimetableEvent::SelectUser(user)).await;
    }

    pub async fn reload(&mut self) {
        self.dispatch(TimetableEvent::Reload).await;
    }

    pub async fn open_add_dialog(&mut self, slot: Slot) {
        self.dispatch(TimetableEvent::OpenAddDialog(slot)).await;
    }

    pub async fn set_query(&mut self, query: impl Into<String>) {
        self.dispatch(TimetableEvent::SetQuery(query.into())).await;
    }

    pub async fn choose_lecture(&mut self, lecture: LectureId) {
        self.dispatch(TimetableEvent::ChooseLecture(lecture)).await;
    }

    pub async fn cancel_add(&mut self) {
        self.dispatch(TimetableEvent::CancelAdd).await;
    }

    pub async fn confirm_add(&mut self) {
        self.dispatch(TimetableEvent::ConfirmAdd).await;
    }

    pub async fn request_remove(&mut self, slot: Slot) {
        self.dispatch(TimetableEvent::RequestRemove(slot)).await;
    }

    pub async fn cancel_remove(&mut self) {
        self.dispatch(TimetableEvent::CancelRemove).await;
    }

    pub async fn confirm_remove(&mut self) {
        self.dispatch(TimetableEvent::ConfirmRemove).await;
    }

    /// Syllabus detail for a lecture's course code.
    ///
    /// # Errors
    ///
    /// Returns the API error unchanged.
    pub async fn fetch_syllabus(&self, code: &str) -> Result<String, ApiError> {
        self.api.syllabus_html(code).await
    }
}
