//! Per-user retry loop: log in, then attempt every candidate course each
//! tick until one of them succeeds.
//!
//! `stop` only halts scheduling. A round already in flight runs to
//! completion and still updates the counters; a stale round never touches
//! the session or the retry counter of a newer generation.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::model::{LoginSession, Stat};
use super::traits::{Course, User};
use crate::config::SchedulerConfig;
use crate::error::ClientError;

#[derive(Default)]
struct TaskState {
    running: bool,
    generation: u64,
    session: Option<LoginSession>,
    consecutive_failures: u32,
    succeeded: u64,
    failed: u64,
    last_error: String,
    elected: bool,
}

impl TaskState {
    fn is_current(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }
}

struct TaskInner {
    user: Arc<dyn User>,
    courses: Vec<Arc<dyn Course>>,
    config: SchedulerConfig,
    state: RwLock<TaskState>,
}

/// A user plus its candidate courses, treated as logical OR.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn new(user: Arc<dyn User>, courses: Vec<Arc<dyn Course>>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                user,
                courses,
                config,
                state: RwLock::new(TaskState::default()),
            }),
        }
    }

    pub fn user(&self) -> &Arc<dyn User> {
        &self.inner.user
    }

    pub fn courses(&self) -> &[Arc<dyn Course>] {
        &self.inner.courses
    }

    /// Begin a fresh generation of the loop. No-op while running.
    pub fn start(&self) {
        let generation = {
            let mut st = self.inner.write();
            if st.running {
                return;
            }
            st.running = true;
            st.session = None;
            st.elected = false;
            st.generation += 1;
            st.generation
        };

        info!(user = %self.inner.user.name(), generation, "Task started");
        tokio::spawn(Arc::clone(&self.inner).run(generation));
    }

    /// Stop scheduling further rounds and drop the session.
    pub fn stop(&self) {
        self.inner.stop();
        debug!(user = %self.inner.user.name(), "Task stopped");
    }

    /// Force a re-login on the next tick. No-op while idle.
    pub fn restart(&self) {
        let mut st = self.inner.write();
        if st.running {
            st.session = None;
        }
    }

    /// Point-in-time snapshot taken under the read lock.
    pub fn statistics(&self) -> Stat {
        let st = self.inner.read();
        Stat {
            running: st.running,
            succeeded: st.succeeded,
            failed: st.failed,
            last_error: st.last_error.clone(),
            elected: st.elected,
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("user", &self.inner.user.name())
            .field("courses", &self.inner.courses.len())
            .field("stat", &self.statistics())
            .finish()
    }
}

impl TaskInner {
    fn read(&self) -> RwLockReadGuard<'_, TaskState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        let mut st = self.write();
        st.running = false;
        st.session = None;
    }

    async fn run(self: Arc<Self>, generation: u64) {
        loop {
            if !self.read().is_current(generation) {
                debug!(user = %self.user.name(), generation, "Loop exiting");
                return;
            }

            let end_of_turn = Instant::now() + self.config.loop_interval;
            let failed = self.run_once(generation).await;
            self.finish_round(generation, failed);

            tokio::time::sleep_until(end_of_turn).await;
        }
    }

    /// One iteration. Returns true if the iteration failed.
    async fn run_once(&self, generation: u64) -> bool {
        let session = self.read().session.clone();
        match session {
            None => self.login(generation).await,
            Some(session) => self.elect_all(generation, &session).await,
        }
    }

    async fn login(&self, generation: u64) -> bool {
        match self.user.login().await {
            Ok(session) => {
                let mut st = self.write();
                if st.is_current(generation) {
                    st.session = Some(session);
                }
                info!(user = %self.user.name(), "Logged in");
                false
            }
            Err(e) => {
                warn!(user = %self.user.name(), "Login failed: {e}");
                let mut st = self.write();
                st.failed += 1;
                st.last_error = format!("{}: {e}", self.user.name());
                true
            }
        }
    }

    async fn elect_all(&self, generation: u64, session: &LoginSession) -> bool {
        let rounds = self.courses.iter().map(|course| self.elect(generation, course, session));
        join_all(rounds).await.into_iter().any(|failed| failed)
    }

    async fn elect(&self, generation: u64, course: &Arc<dyn Course>, session: &LoginSession) -> bool {
        let outcome = course.elect(session).await;

        let mut st = self.write();
        match outcome {
            Ok(elected) => {
                st.succeeded += 1;
                if elected {
                    info!(user = %self.user.name(), course = %course.name(), "Elected");
                    st.elected = true;
                    if st.is_current(generation) {
                        st.running = false;
                        st.session = None;
                    }
                }
                false
            }
            Err(ClientError::SessionExpired) => {
                debug!(user = %self.user.name(), course = %course.name(), "Session expired");
                st.last_error = format!("{}: {}: session expired", self.user.name(), course.name());
                if st.is_current(generation) {
                    st.session = None;
                }
                false
            }
            Err(e) => {
                debug!(user = %self.user.name(), course = %course.name(), "Elect failed: {e}");
                st.failed += 1;
                st.last_error = format!("{}: {}: {e}", self.user.name(), course.name());
                true
            }
        }
    }

    fn finish_round(&self, generation: u64, failed: bool) {
        let mut st = self.write();
        if !st.is_current(generation) {
            return;
        }

        if failed {
            st.consecutive_failures += 1;
            if st.consecutive_failures >= self.config.max_retry {
                warn!(
                    user = %self.user.name(),
                    failures = st.consecutive_failures,
                    "Too many consecutive failures, logging in again"
                );
                st.session = None;
            }
        } else {
            st.consecutive_failures = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::task::model::CourseData;

    const INTERVAL: Duration = Duration::from_secs(3);

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_retry: 5,
            loop_interval: INTERVAL,
        }
    }

    #[derive(Default)]
    struct FakeUser {
        logins: AtomicU32,
        errors_to_make: AtomicU32,
    }

    #[async_trait]
    impl User for FakeUser {
        fn name(&self) -> &str {
            "reimu"
        }

        async fn login(&self) -> Result<LoginSession, ClientError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if take_one(&self.errors_to_make) {
                return Err(ClientError::LoginRejected("False Alarm".into()));
            }
            Ok(LoginSession::new("cookie"))
        }

        async fn list_courses(&self) -> Result<Vec<CourseData>, ClientError> {
            Ok(Vec::new())
        }
    }

    /// Errors first, then reports full, then takes a seat.
    #[derive(Default)]
    struct FakeCourse {
        attempts: AtomicU32,
        errors_to_make: AtomicU32,
        full_remaining: AtomicU32,
        expire_once: AtomicBool,
        delay: Option<Duration>,
    }

    impl FakeCourse {
        fn new(full: u32, errors: u32) -> Self {
            Self {
                full_remaining: AtomicU32::new(full),
                errors_to_make: AtomicU32::new(errors),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Course for FakeCourse {
        fn name(&self) -> &str {
            "Danmaku 101"
        }

        async fn elect(&self, _session: &LoginSession) -> Result<bool, ClientError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.expire_once.swap(false, Ordering::SeqCst) {
                return Err(ClientError::SessionExpired);
            }
            if take_one(&self.errors_to_make) {
                return Err(ClientError::Domain("False Alarm".into()));
            }
            Ok(!take_one(&self.full_remaining))
        }
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn task(user: &Arc<FakeUser>, course: &Arc<FakeCourse>) -> Task {
        Task::new(
            Arc::clone(user) as Arc<dyn User>,
            vec![Arc::clone(course) as Arc<dyn Course>],
            config(),
        )
    }

    async fn ticks(n: u32) {
        tokio::time::sleep(INTERVAL * n + Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_five_times_then_elected() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(5, 0));
        let t = task(&user, &course);

        t.start();
        ticks(8).await;

        let s = t.statistics();
        assert_eq!(user.logins.load(Ordering::SeqCst), 1);
        assert_eq!(course.attempts.load(Ordering::SeqCst), 6);
        assert!(s.elected);
        assert!(!s.running);
        assert_eq!(s.succeeded, 6);
        assert_eq!(s.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_force_relogin() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(0, 100));
        let t = task(&user, &course);

        t.start();
        // Twelve rounds: login, five failures, login, five failures.
        ticks(11).await;

        let s = t.statistics();
        assert!(s.running);
        assert_eq!(user.logins.load(Ordering::SeqCst), 2);
        assert_eq!(course.attempts.load(Ordering::SeqCst), 10);
        assert_eq!(s.failed, 10);
        assert_eq!(s.succeeded, 0);
        assert!(s.last_error.contains("False Alarm"));
        t.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_errors_and_elects() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(5, 10));
        let t = task(&user, &course);

        t.start();
        ticks(20).await;

        let s = t.statistics();
        assert!(s.elected);
        assert!(!s.running);
        assert_eq!(course.attempts.load(Ordering::SeqCst), 16);
        assert!(user.logins.load(Ordering::SeqCst) <= 3);
        assert_eq!(s.failed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn login_failures_are_counted() {
        let user = Arc::new(FakeUser {
            errors_to_make: AtomicU32::new(2),
            ..Default::default()
        });
        let course = Arc::new(FakeCourse::new(0, 0));
        let t = task(&user, &course);

        t.start();
        ticks(5).await;

        let s = t.statistics();
        assert_eq!(user.logins.load(Ordering::SeqCst), 3);
        assert_eq!(s.failed, 2);
        assert!(s.elected);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_right_after_start_with_round_in_flight() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse {
            delay: Some(Duration::from_secs(1)),
            ..FakeCourse::new(100, 0)
        });
        let t = task(&user, &course);

        t.start();
        // Login completes, first elect round is sleeping inside the course.
        tokio::time::sleep(INTERVAL + Duration::from_millis(500)).await;
        assert_eq!(course.attempts.load(Ordering::SeqCst), 1);

        t.stop();
        assert!(!t.statistics().running);

        ticks(4).await;
        let s = t.statistics();
        assert!(!s.running);
        assert!(!s.elected);
        // The in-flight round finished and counted; nothing ran after it.
        assert_eq!(s.succeeded, 1);
        assert_eq!(course.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(0, 0));
        let t = task(&user, &course);

        t.start();
        t.stop();
        ticks(3).await;

        let s = t.statistics();
        assert!(!s.running);
        assert!(!s.elected);
        assert_eq!(course.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_runs_one_fresh_loop() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(5, 0));
        let t = task(&user, &course);

        t.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        t.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        t.start();
        ticks(9).await;

        let s = t.statistics();
        assert!(s.elected);
        assert!(!s.running);
        assert_eq!(user.logins.load(Ordering::SeqCst), 2);
        assert_eq!(course.attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_noop() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(100, 0));
        let t = task(&user, &course);

        t.start();
        t.start();
        ticks(3).await;

        // A second loop would double the attempts.
        assert_eq!(user.logins.load(Ordering::SeqCst), 1);
        assert_eq!(course.attempts.load(Ordering::SeqCst), 3);
        t.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn statistics_readers_run_alongside_the_loop() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(u32::MAX, 0));
        let t = Task::new(
            Arc::clone(&user) as Arc<dyn User>,
            vec![Arc::clone(&course) as Arc<dyn Course>],
            SchedulerConfig {
                max_retry: 5,
                loop_interval: Duration::from_millis(1),
            },
        );
        t.start();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let t = t.clone();
                tokio::spawn(async move {
                    let mut last = 0;
                    for _ in 0..200 {
                        let s = t.statistics();
                        assert!(s.succeeded >= last);
                        last = s.succeeded;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.await.unwrap();
        }

        assert!(t.statistics().running);
        t.stop();
        assert!(!t.statistics().running);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_forces_relogin_while_running() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse::new(100, 0));
        let t = task(&user, &course);

        t.restart();
        t.start();
        ticks(2).await;
        assert_eq!(user.logins.load(Ordering::SeqCst), 1);

        t.restart();
        ticks(1).await;
        assert_eq!(user.logins.load(Ordering::SeqCst), 2);
        assert!(t.statistics().running);
        t.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn session_expired_relogs_without_counting_failure() {
        let user = Arc::new(FakeUser::default());
        let course = Arc::new(FakeCourse {
            expire_once: AtomicBool::new(true),
            ..FakeCourse::new(0, 0)
        });
        let t = task(&user, &course);

        t.start();
        ticks(5).await;

        let s = t.statistics();
        assert_eq!(user.logins.load(Ordering::SeqCst), 2);
        assert_eq!(s.failed, 0);
        assert!(s.elected);
        assert!(s.last_error.contains("session expired"));
    }
}
