//! Task bookkeeping: the state machine, the dispatcher and the handlers.

pub mod dispatcher;
pub mod handlers;
pub mod state;

pub use dispatcher::{TaskDispatcher, TaskDispatcherBuilder, TaskHandler};
pub use handlers::{process_task, register_default_handlers, submit_task, TaskContext};
pub use state::{change_task_state, fail_task, take_container_task, take_content_task, take_task, TakeError, TakenTask};
