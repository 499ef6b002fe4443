// Cooperative scheduler and wake/sleep primitives
// Single core, no preemption. WFI idles the CPU between events.
//
// queue:     fixed-capacity ring buffer (scheduler and bus managers)
// task:      deferred callbacks (Task, Handler)
// scheduler: the event loop every interrupt handler posts into
// ids:       16-bit wait handles
// wake:      idle hook

pub mod ids;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod wake;

pub use ids::{IdGenerator, WaitId};
pub use queue::TaskQueue;
pub use scheduler::{DEFAULT_QUEUE_SIZE, QueueFull, Scheduler, TaskSink};
pub use task::{Handler, Task};
pub use wake::{Sleep, Wfi};
