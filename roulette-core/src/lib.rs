pub mod error;
pub mod model;
pub mod selection;

pub use error::AssignmentError;
pub use model::{PrStatus, PullRequest, PullRequestId, Team, TeamName, User, UserId};
pub use selection::{FixedSelector, RandomSelector, ReviewerSelector};
