use crate::error::TaskError;
use crate::task::Status;
use bitflags::bitflags;

bitflags! {
    /// Hints and behaviors requested when creating a task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaskCreationOptions: u32 {
        /// Queue in FIFO order with other work rather than on the local queue
        /// of the creating worker.
        const PREFER_FAIRNESS = 1;

        /// The task blocks for a long time; schedulers may give it a dedicated
        /// thread and refuse to inline it once queued.
        const LONG_RUNNING = 1 << 1;

        /// Attach to the parent given to the factory. The parent does not
        /// complete until this task does.
        const ATTACHED_TO_PARENT = 1 << 2;

        /// Refuse attachment of children created with `ATTACHED_TO_PARENT`.
        const DENY_CHILD_ATTACH = 1 << 3;

        /// Never run this task's continuations on the completing thread.
        const RUN_CONTINUATIONS_ASYNCHRONOUSLY = 1 << 6;
    }
}

bitflags! {
    /// Options of a continuation task. The low bits mirror
    /// [`TaskCreationOptions`] and apply to the continuation itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContinuationOptions: u32 {
        const PREFER_FAIRNESS = TaskCreationOptions::PREFER_FAIRNESS.bits();
        const LONG_RUNNING = TaskCreationOptions::LONG_RUNNING.bits();
        const ATTACHED_TO_PARENT = TaskCreationOptions::ATTACHED_TO_PARENT.bits();
        const DENY_CHILD_ATTACH = TaskCreationOptions::DENY_CHILD_ATTACH.bits();

        /// When the continuation's token fires, complete it as canceled only
        /// once the antecedent finished.
        const LAZY_CANCELLATION = 1 << 5;

        const RUN_CONTINUATIONS_ASYNCHRONOUSLY = TaskCreationOptions::RUN_CONTINUATIONS_ASYNCHRONOUSLY.bits();

        const NOT_ON_RAN_TO_COMPLETION = 1 << 16;
        const NOT_ON_FAULTED = 1 << 17;
        const NOT_ON_CANCELED = 1 << 18;

        /// Try to run on the thread that completes the antecedent.
        const EXECUTE_SYNCHRONOUSLY = 1 << 19;

        const ONLY_ON_RAN_TO_COMPLETION = Self::NOT_ON_FAULTED.bits() | Self::NOT_ON_CANCELED.bits();
        const ONLY_ON_FAULTED = Self::NOT_ON_RAN_TO_COMPLETION.bits() | Self::NOT_ON_CANCELED.bits();
        const ONLY_ON_CANCELED = Self::NOT_ON_RAN_TO_COMPLETION.bits() | Self::NOT_ON_FAULTED.bits();
    }
}

impl ContinuationOptions {
    const PREDICATES: Self = Self::NOT_ON_RAN_TO_COMPLETION
        .union(Self::NOT_ON_FAULTED)
        .union(Self::NOT_ON_CANCELED);

    /// Options applied to the continuation task itself.
    pub fn creation_options(self) -> TaskCreationOptions {
        TaskCreationOptions::from_bits_truncate(self.bits())
    }

    pub(crate) fn validate(self) -> Result<Self, TaskError> {
        if self.contains(Self::PREDICATES) {
            return Err(TaskError::IllegalOptions(
                "a continuation cannot exclude every terminal state".into(),
            ));
        }

        if self.contains(Self::LONG_RUNNING | Self::EXECUTE_SYNCHRONOUSLY) {
            return Err(TaskError::IllegalOptions(
                "LONG_RUNNING and EXECUTE_SYNCHRONOUSLY are mutually exclusive".into(),
            ));
        }

        Ok(self)
    }

    /// Multi-antecedent continuations have no single status to filter on.
    pub(crate) fn validate_for_many(self) -> Result<Self, TaskError> {
        if self.intersects(Self::PREDICATES) {
            return Err(TaskError::IllegalOptions(
                "NOT_ON_* and ONLY_ON_* are not allowed on multi-antecedent continuations".into(),
            ));
        }
        self.validate()
    }

    /// Whether a continuation with these options runs after an antecedent
    /// that finished with `status`.
    pub(crate) fn is_satisfied_by(self, status: Status) -> bool {
        match status {
            Status::RanToCompletion => !self.contains(Self::NOT_ON_RAN_TO_COMPLETION),
            Status::Faulted => !self.contains(Self::NOT_ON_FAULTED),
            Status::Canceled => !self.contains(Self::NOT_ON_CANCELED),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::none(ContinuationOptions::empty(), [true, true, true])]
    #[case::only_ran(ContinuationOptions::ONLY_ON_RAN_TO_COMPLETION, [true, false, false])]
    #[case::only_faulted(ContinuationOptions::ONLY_ON_FAULTED, [false, true, false])]
    #[case::only_canceled(ContinuationOptions::ONLY_ON_CANCELED, [false, false, true])]
    #[case::not_on_faulted(ContinuationOptions::NOT_ON_FAULTED, [true, false, true])]
    fn test_is_satisfied_by(#[case] options: ContinuationOptions, #[case] expected: [bool; 3]) {
        let statuses = [Status::RanToCompletion, Status::Faulted, Status::Canceled];
        for (status, expected) in statuses.into_iter().zip(expected) {
            assert_eq!(options.is_satisfied_by(status), expected, "{status:?}");
        }
        assert!(!options.is_satisfied_by(Status::Running));
    }

    #[rstest]
    #[case::all_predicates(
        ContinuationOptions::NOT_ON_RAN_TO_COMPLETION
            | ContinuationOptions::NOT_ON_FAULTED
            | ContinuationOptions::NOT_ON_CANCELED
    )]
    #[case::long_and_sync(ContinuationOptions::LONG_RUNNING | ContinuationOptions::EXECUTE_SYNCHRONOUSLY)]
    fn test_validate_rejects(#[case] options: ContinuationOptions) {
        assert!(matches!(options.validate(), Err(TaskError::IllegalOptions(_))));
    }

    #[test]
    fn test_validate_for_many() {
        assert!(ContinuationOptions::EXECUTE_SYNCHRONOUSLY.validate_for_many().is_ok());
        assert!(matches!(
            ContinuationOptions::NOT_ON_CANCELED.validate_for_many(),
            Err(TaskError::IllegalOptions(_))
        ));
    }

    #[test]
    fn test_creation_options() {
        let options = ContinuationOptions::ATTACHED_TO_PARENT
            | ContinuationOptions::LAZY_CANCELLATION
            | ContinuationOptions::NOT_ON_FAULTED
            | ContinuationOptions::RUN_CONTINUATIONS_ASYNCHRONOUSLY;

        assert_eq!(
            options.creation_options(),
            TaskCreationOptions::ATTACHED_TO_PARENT
                | TaskCreationOptions::RUN_CONTINUATIONS_ASYNCHRONOUSLY
        );
    }
}
