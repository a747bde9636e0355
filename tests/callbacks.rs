use std::{cell::RefCell, rc::Rc};

use model_task::{
    Callback, HParams, Hook, LinearTask, Task, TaskErr, TaskUpdate, TrainerState,
    callback::{self, AttributeSchedule, NoopCallback},
    linear::GRAD_CLIP,
};

/// Records the hooks it sees into a shared log, requesting nothing.
struct Recorder {
    seen: Rc<RefCell<Vec<(Hook, usize)>>>,
}

impl Callback for Recorder {
    fn on_train_start(&mut self, state: &TrainerState, _task: &dyn Task) -> Vec<TaskUpdate> {
        self.seen.borrow_mut().push((Hook::TrainStart, state.epoch));
        Vec::new()
    }

    fn on_train_epoch_start(&mut self, state: &TrainerState, _task: &dyn Task) -> Vec<TaskUpdate> {
        self.seen
            .borrow_mut()
            .push((Hook::TrainEpochStart, state.epoch));
        Vec::new()
    }
}

#[test]
fn default_epoch_start_hook_leaves_the_task_untouched() {
    let task = LinearTask::zeros(HParams::new(1e-3).unwrap(), 2, 3);
    let state = TrainerState::default();

    let mut noop = NoopCallback;
    assert!(noop.on_train_epoch_start(&state, &task).is_empty());

    let mut clone = task.clone();
    let mut callbacks: Vec<Box<dyn Callback>> = vec![Box::new(NoopCallback)];
    for hook in [
        Hook::TrainStart,
        Hook::TrainEpochStart,
        Hook::TrainEpochEnd,
        Hook::TrainEnd,
    ] {
        callback::dispatch(&mut callbacks, hook, &state, &mut clone).unwrap();
    }

    assert_eq!(clone.hparams(), task.hparams());
    assert_eq!(clone.parameters(), task.parameters());
    assert_eq!(clone.grad_clip(), None);
}

#[test]
fn scheduled_attribute_is_applied_at_its_epoch() {
    let mut task = LinearTask::zeros(HParams::default(), 1, 1);
    let mut callbacks: Vec<Box<dyn Callback>> =
        vec![Box::new(AttributeSchedule::new(GRAD_CLIP, [(2, 0.5)]))];

    let mut state = TrainerState {
        max_epochs: Some(4),
        ..Default::default()
    };

    for epoch in 0..4 {
        state.epoch = epoch;
        callback::dispatch(&mut callbacks, Hook::TrainEpochStart, &state, &mut task).unwrap();

        let expected = if epoch < 2 { None } else { Some(0.5) };
        assert_eq!(task.grad_clip(), expected);
    }
}

#[test]
fn rejected_updates_are_reported() {
    let mut task = LinearTask::zeros(HParams::default(), 1, 1);
    let mut callbacks: Vec<Box<dyn Callback>> =
        vec![Box::new(AttributeSchedule::new("dropout", [(0, 0.1)]))];

    let err = callback::dispatch(
        &mut callbacks,
        Hook::TrainEpochStart,
        &TrainerState::default(),
        &mut task,
    )
    .unwrap_err();

    assert!(matches!(err, TaskErr::UnsupportedUpdate { name } if name == "dropout"));
}

#[test]
fn hooks_only_reach_their_own_method() {
    let mut task = LinearTask::zeros(HParams::default(), 1, 1);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut callbacks: Vec<Box<dyn Callback>> = vec![
        Box::new(Recorder { seen: seen.clone() }),
        Box::new(NoopCallback),
        Box::new(Recorder { seen: seen.clone() }),
    ];
    let state = TrainerState {
        epoch: 3,
        ..Default::default()
    };

    for hook in [Hook::TrainStart, Hook::TrainEpochEnd, Hook::TrainEpochStart] {
        callback::dispatch(&mut callbacks, hook, &state, &mut task).unwrap();
    }

    assert_eq!(
        *seen.borrow(),
        [
            (Hook::TrainStart, 3),
            (Hook::TrainStart, 3),
            (Hook::TrainEpochStart, 3),
            (Hook::TrainEpochStart, 3),
        ]
    );
}
