//! Schemas for every campus API payload.
//!
//! DESIGN
//! ======
//! The directory and timetable services are externally owned, so their
//! JSON is parsed into explicit types at the boundary. The timetable grid
//! arrives as nested string-keyed maps; it is converted into a
//! `Slot`-keyed map once, and unknown keys fail the whole snapshot.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ApiError;

// =============================================================================
// USERS
// =============================================================================

/// Server-assigned user identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Entry in the user picker (`GET /users`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
}

/// Identity attached to the current cookie session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub login_time: i64,
}

/// Answer of `GET /auth?action=check`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

impl AuthStatus {
    #[must_use]
    pub fn anonymous() -> Self {
        Self { authenticated: false, user: None }
    }
}

// =============================================================================
// LECTURES
// =============================================================================

pub type LectureId = i64;

/// A lecture record owned by the directory service. Every descriptive
/// field is optional on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lecture {
    pub id: LectureId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lecturer: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Course code; key for `GET /syllabuses/{code}`.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    /// Free-form day/period label such as `月２`.
    #[serde(default)]
    pub time: Option<String>,
}

impl Lecture {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn lecturer_name(&self) -> &str {
        self.lecturer.as_deref().unwrap_or("")
    }

    /// Case-insensitive substring match against name or lecturer.
    /// A blank query matches everything.
    #[must_use]
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        self.display_name().to_lowercase().contains(&needle)
            || self.lecturer_name().to_lowercase().contains(&needle)
    }
}

/// Field filters for `GET /lectures`. Blank values are not sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LectureQuery {
    pub title: Option<String>,
    pub category: Option<String>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub lecturer: Option<String>,
    pub grade: Option<String>,
    pub class_name: Option<String>,
    pub season: Option<String>,
    pub time: Option<String>,
    /// Matched against every field server-side.
    pub keyword: Option<String>,
}

impl LectureQuery {
    #[must_use]
    pub fn keyword(keyword: impl Into<String>) -> Self {
        Self { keyword: Some(keyword.into()), ..Self::default() }
    }

    /// Query-string pairs in a stable order, skipping blank filters.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let fields = [
            ("title", &self.title),
            ("category", &self.category),
            ("code", &self.code),
            ("name", &self.name),
            ("lecturer", &self.lecturer),
            ("grade", &self.grade),
            ("class_name", &self.class_name),
            ("season", &self.season),
            ("time", &self.time),
            ("keyword", &self.keyword),
        ];
        fields
            .into_iter()
            .filter_map(|(key, value)| {
                value
                    .as_deref()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (key, v.to_owned()))
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_pairs().is_empty()
    }
}

// =============================================================================
// SLOTS
// =============================================================================

/// Invalid day or period input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("invalid day: {0} (expected 1-5, 月-金 or mon-fri)")]
    InvalidDay(String),
    #[error("invalid period: {0} (expected 1-6)")]
    InvalidPeriod(String),
}

/// Teaching day. Discriminants are the wire `day_of_week` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Day {
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
}

impl Day {
    pub const ALL: [Day; 5] = [Day::Monday, Day::Tuesday, Day::Wednesday, Day::Thursday, Day::Friday];

    #[must_use]
    pub fn index(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index).checked_sub(1)?).copied()
    }

    /// Label used by the directory service for `?day=`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Monday => "月",
            Self::Tuesday => "火",
            Self::Wednesday => "水",
            Self::Thursday => "木",
            Self::Friday => "金",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|day| day.label() == label)
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Day {
    type Err = SlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if let Some(day) = raw.parse::<u8>().ok().and_then(Self::from_index) {
            return Ok(day);
        }
        if let Some(day) = Self::from_label(raw) {
            return Ok(day);
        }
        match raw.to_ascii_lowercase().as_str() {
            "mon" | "monday" => Ok(Self::Monday),
            "tue" | "tuesday" => Ok(Self::Tuesday),
            "wed" | "wednesday" => Ok(Self::Wednesday),
            "thu" | "thursday" => Ok(Self::Thursday),
            "fri" | "friday" => Ok(Self::Friday),
            _ => Err(SlotError::InvalidDay(raw.to_owned())),
        }
    }
}

/// Teaching period, 1 through 6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(u8);

impl Period {
    pub const COUNT: u8 = 6;

    #[must_use]
    pub fn new(value: u8) -> Option<Self> {
        (1..=Self::COUNT).contains(&value).then_some(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Period> {
        (1..=Self::COUNT).map(Self)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}限", self.0)
    }
}

impl FromStr for Period {
    type Err = SlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let digits = raw.strip_suffix("限").unwrap_or(raw);
        digits
            .parse::<u8>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| SlotError::InvalidPeriod(raw.to_owned()))
    }
}

/// Addressable (day, period) position in the weekly grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub day: Day,
    pub period: Period,
}

impl Slot {
    #[must_use]
    pub fn new(day: Day, period: Period) -> Self {
        Self { day, period }
    }

    #[must_use]
    pub fn from_indices(day: u8, period: u8) -> Option<Self> {
        Some(Self { day: Day::from_index(day)?, period: Period::new(period)? })
    }

    /// All 30 slots, day-major.
    pub fn all() -> impl Iterator<Item = Slot> {
        Day::ALL
            .into_iter()
            .flat_map(|day| Period::all().map(move |period| Slot { day, period }))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.day, self.period)
    }
}

// =============================================================================
// TIMETABLE
// =============================================================================

/// Wire form of `GET /users/{id}/timetable`.
#[derive(Clone, Debug, Deserialize)]
pub struct TimetableResponse {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub timetable: BTreeMap<String, BTreeMap<String, Option<Lecture>>>,
}

/// One user's full grid as last fetched. Empty cells are absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimetableSnapshot {
    user_id: UserId,
    cells: BTreeMap<Slot, Lecture>,
}

impl TimetableSnapshot {
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        Self { user_id, cells: BTreeMap::new() }
    }

    /// Convert the nested wire map into a slot-keyed snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` when a day or period key is outside the
    /// grid, or when the echoed `user_id` differs from the requested one.
    pub fn from_wire(user_id: UserId, wire: TimetableResponse) -> Result<Self, ApiError> {
        let endpoint = format!("/users/{user_id}/timetable");
        if let Some(echoed) = wire.user_id {
            if echoed != user_id {
                return Err(ApiError::malformed(&endpoint, format!("user_id {echoed} does not match request")));
            }
        }
        let mut cells = BTreeMap::new();
        for (day_key, periods) in wire.timetable {
            let day = day_key
                .parse::<u8>()
                .ok()
                .and_then(Day::from_index)
                .ok_or_else(|| ApiError::malformed(&endpoint, format!("unknown day key {day_key:?}")))?;
            for (period_key, lecture) in periods {
                let period = period_key
                    .parse::<u8>()
                    .ok()
                    .and_then(Period::new)
                    .ok_or_else(|| ApiError::malformed(&endpoint, format!("unknown period key {period_key:?}")))?;
                if let Some(lecture) = lecture {
                    cells.insert(Slot::new(day, period), lecture);
                }
            }
        }
        Ok(Self { user_id, cells })
    }

    #[must_use]
    pub fn with_cell(mut self, slot: Slot, lecture: Lecture) -> Self {
        self.cells.insert(slot, lecture);
        self
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn cell(&self, slot: Slot) -> Option<&Lecture> {
        self.cells.get(&slot)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&Slot, &Lecture)> {
        self.cells.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Body of `POST /timetables/{id}/lectures`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AddLectureRequest {
    pub day_of_week: u8,
    pub period: u8,
    pub lecture_id: LectureId,
}

impl AddLectureRequest {
    #[must_use]
    pub fn new(slot: Slot, lecture_id: LectureId) -> Self {
        Self { day_of_week: slot.day.index(), period: slot.period.get(), lecture_id }
    }
}

/// Body of `POST /timetables/{id}/lectures/remove`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemoveLectureRequest {
    pub day_of_week: u8,
    pub period: u8,
}

impl From<Slot> for RemoveLectureRequest {
    fn from(slot: Slot) -> Self {
        Self { day_of_week: slot.day.index(), period: slot.period.get() }
    }
}

/// Acknowledgement returned by the mutation endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MutationAck {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// CHAT
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Body of `POST /chat`. `messages` already ends with the new question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub question: String,
    pub messages: Vec<ChatMessage>,
}

// =============================================================================
// PAGE GENERATION
// =============================================================================

/// Title the generator falls back to when the model omits one.
pub const DEFAULT_PAGE_TITLE: &str = "AI 生成ページ";

/// Body of `POST /generate-page`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub prompt: String,
}

impl PageRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into() }
    }

    /// Prompt asking the generator to revise `current` per `instruction`.
    /// The server is stateless, so the whole page travels with the request.
    #[must_use]
    pub fn revise(current: &GeneratedPage, instruction: &str) -> Self {
        Self {
            prompt: format!(
                "現在のページ情報:\nタイトル: {}\n\nHTML内容:\n{}\n\nCSS内容:\n{}\n\n修正要求: {}\n\n\
                 上記の現在のページに対して、修正要求に従ってページを修正してください。\n",
                current.title, current.html_content, current.css_content, instruction
            ),
        }
    }
}

/// Page produced by `POST /generate-page`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPage {
    #[serde(default = "default_page_title")]
    pub title: String,
    /// Markup for inside `<body>`.
    #[serde(default)]
    pub html_content: String,
    #[serde(default)]
    pub css_content: String,
}

fn default_page_title() -> String {
    DEFAULT_PAGE_TITLE.to_owned()
}
