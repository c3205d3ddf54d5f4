//! Contains a set of compile failure doctests.

// -----------------------------------------------------------------------------
// Ensures a handle cannot outlive its queue.

/** ```compile_fail,E0597

use lax::RelaxedQueue;

let handle = {
    let queue: RelaxedQueue = RelaxedQueue::new(1, 64).unwrap();
    queue.handle()
    //~^ ERROR
};

``` */
mod handle_outlives_queue {}

// -----------------------------------------------------------------------------
// Ensures handles cannot be shared between threads by reference.

/** ```compile_fail,E0277

use lax::RelaxedQueue;

let queue: RelaxedQueue = RelaxedQueue::new(1, 64).unwrap();
let handle = queue.handle();
let r = &handle;
std::thread::scope(|scope| {
    scope.spawn(move || r); //~ ERROR
});

``` */
mod handle_not_sync {}
