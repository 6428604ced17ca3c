// Status machines for tasks and steps
//
// Transitions are pure functions over in-memory records. The task state
// controller applies them inside a compare-and-swap write so that every
// persisted status change has passed through one of these machines.

pub mod errors;
pub mod events;
pub mod guards;
pub mod states;
pub mod step_state_machine;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::{StepEvent, TaskEvent};
pub use states::{StepStatus, TaskStatus};
pub use step_state_machine::StepStateMachine;
pub use task_state_machine::TaskStateMachine;

pub use guards::StateGuard;
