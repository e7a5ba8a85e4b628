//! Who may edit or delete a post.
//!
//! The policy is an ordered rule table. Each rule either returns a verdict or
//! passes, the first verdict wins, and a request no rule objects to is
//! permitted.

use crate::model::{Id, post::Post, user::UserMarker};
use time::{Duration, UtcDateTime};
use tracing::debug;

/// How long after posting an ordinary user may still change a post.
pub const EDIT_WINDOW: Duration = Duration::hours(24);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum PostAction {
    Read,
    Edit,
    Delete,
}

impl PostAction {
    /// Maps an HTTP method name onto the action it performs on a post.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "GET" | "HEAD" | "OPTIONS" => Some(Self::Read),
            "PATCH" | "PUT" => Some(Self::Edit),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// The authenticated user behind a request.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Actor {
    pub user: Id<UserMarker>,
    /// Whether the user moderates the board the post is on.
    pub is_moderator: bool,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PermissionRequest<'a> {
    pub action: PostAction,
    pub actor: Option<Actor>,
    pub post: &'a Post,
    pub now: UtcDateTime,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum Verdict {
    Permit,
    Deny,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Decision {
    pub verdict: Verdict,
    /// Name of the rule that decided, or `"default"`.
    pub rule: &'static str,
}

impl Decision {
    #[must_use]
    pub fn is_permitted(self) -> bool {
        self.verdict == Verdict::Permit
    }
}

struct Rule {
    name: &'static str,
    check: fn(&PermissionRequest<'_>) -> Option<Verdict>,
}

const RULES: [Rule; 7] = [
    Rule {
        name: "read",
        check: reading,
    },
    Rule {
        name: "anonymous",
        check: anonymous,
    },
    Rule {
        name: "moderator",
        check: moderator,
    },
    Rule {
        name: "thread_root",
        check: thread_root,
    },
    Rule {
        name: "edit_window",
        check: outside_edit_window,
    },
    Rule {
        name: "not_author",
        check: not_author,
    },
    Rule {
        name: "already_edited",
        check: already_edited,
    },
];

fn reading(request: &PermissionRequest<'_>) -> Option<Verdict> {
    (request.action == PostAction::Read).then_some(Verdict::Permit)
}

fn anonymous(request: &PermissionRequest<'_>) -> Option<Verdict> {
    request.actor.is_none().then_some(Verdict::Deny)
}

fn moderator(request: &PermissionRequest<'_>) -> Option<Verdict> {
    request
        .actor
        .is_some_and(|actor| actor.is_moderator)
        .then_some(Verdict::Permit)
}

fn thread_root(request: &PermissionRequest<'_>) -> Option<Verdict> {
    request.post.is_thread_root().then_some(Verdict::Deny)
}

fn outside_edit_window(request: &PermissionRequest<'_>) -> Option<Verdict> {
    (request.now - request.post.date > EDIT_WINDOW).then_some(Verdict::Deny)
}

fn not_author(request: &PermissionRequest<'_>) -> Option<Verdict> {
    let author = request.post.author;
    let actor = request.actor.map(|actor| actor.user);
    (author.is_none() || author != actor).then_some(Verdict::Deny)
}

// Edits only; a post that was edited may still be deleted.
fn already_edited(request: &PermissionRequest<'_>) -> Option<Verdict> {
    (request.action == PostAction::Edit && request.post.edited_at.is_some())
        .then_some(Verdict::Deny)
}

#[must_use]
pub fn evaluate(request: &PermissionRequest<'_>) -> Decision {
    let decision = RULES
        .iter()
        .find_map(|rule| {
            (rule.check)(request).map(|verdict| Decision {
                verdict,
                rule: rule.name,
            })
        })
        .unwrap_or(Decision {
            verdict: Verdict::Permit,
            rule: "default",
        });

    debug!(
        post = %request.post.id,
        action = ?request.action,
        verdict = ?decision.verdict,
        rule = decision.rule,
        "Evaluated post permission"
    );

    decision
}
