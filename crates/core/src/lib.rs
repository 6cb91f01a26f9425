pub mod error;
pub mod event;
pub mod media;
pub mod poller;
pub mod scheduler;
pub mod sink;
pub mod thread_pool;

pub use error::{ExtractError, LiveError, Result};
pub use event::{Interest, IoWatcher, Timer, TimerId, Trigger};
pub use media::{Codec, MediaFrame, MediaSource, SourceConfig};
pub use poller::{Poller, SelectPoller};
pub use scheduler::{RemoteTrigger, Scheduler, SchedulerConfig, SchedulerRemote};
pub use sink::Sink;
pub use thread_pool::{PoolHandle, Task, TaskHandler, ThreadPool};
