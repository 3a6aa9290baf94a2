//! Game session: state machine, GPGNet relay, ICE message cache and replay
//! capture.

pub mod game_process;
pub mod game_session;
pub mod ice_cache;
pub mod relay;
pub mod replay;
pub mod state;

pub use game_process::{GameLaunch, GameProcess};
pub use game_session::{GameSession, HostedGame, SessionEvent};
pub use ice_cache::IceMessageCache;
pub use relay::{RelayCommand, RelayMessage, GAME_TARGET};
pub use replay::{CapturedReplay, ReplayCapture, ReplayTarget};
pub use state::GameSessionState;
