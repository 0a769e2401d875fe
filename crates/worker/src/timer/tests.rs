use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};

use super::*;

type Hits = Vec<&'static str>;

fn dispatcher<S: 'static>() -> TimerDispatcher<S> {
	TimerDispatcher::new(16).stack_buf_len(0)
}

async fn run_next<S: 'static>(timers: &mut TimerDispatcher<S>, state: &mut S) {
	let timer = timers.recv().await.expect("timer queue closed");
	timer.cb(state);
}

fn every_second() -> CronExpr {
	CronExpr::parse("* * * * * *").unwrap()
}

#[tokio::test(start_paused = true)]
async fn timers_fire_in_deadline_order() {
	let mut timers = dispatcher::<Hits>();
	let mut hits = Vec::new();

	timers.after_func(Duration::from_secs(5), |hits: &mut Hits| hits.push("late"));
	timers.after_func(Duration::from_secs(1), |hits: &mut Hits| hits.push("early"));

	run_next(&mut timers, &mut hits).await;
	run_next(&mut timers, &mut hits).await;
	assert_eq!(hits, vec!["early", "late"]);
}

#[tokio::test(start_paused = true)]
async fn stop_before_firing_prevents_delivery() {
	let mut timers = dispatcher::<Hits>();
	let mut hits = Vec::new();

	let stopped = timers.after_func(Duration::from_secs(1), |hits: &mut Hits| hits.push("stopped"));
	timers.after_func(Duration::from_secs(2), |hits: &mut Hits| hits.push("kept"));
	stopped.stop();
	assert!(!stopped.is_active());

	run_next(&mut timers, &mut hits).await;
	assert_eq!(hits, vec!["kept"]);
	assert!(timers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_after_firing_turns_the_queued_timer_into_a_no_op() {
	let mut timers = dispatcher::<u32>();
	let mut count = 0;

	let timer = timers.after_func(Duration::from_secs(1), |count: &mut u32| *count += 1);
	let fired = timers.recv().await.unwrap();
	timer.stop();
	fired.cb(&mut count);
	assert_eq!(count, 0);
}

#[tokio::test(start_paused = true)]
async fn callback_runs_at_most_once() {
	let mut timers = dispatcher::<u32>();
	let mut count = 0;

	timers.after_func(Duration::ZERO, |count: &mut u32| *count += 1);
	let fired = timers.recv().await.unwrap();
	assert!(fired.is_active());
	fired.cb(&mut count);
	fired.cb(&mut count);
	assert_eq!(count, 1);
	assert!(!fired.is_active());
}

#[tokio::test(start_paused = true)]
async fn panicking_timer_callback_is_contained() {
	let mut timers = dispatcher::<u32>();
	let mut count = 0;

	timers.after_func(Duration::from_secs(1), |_: &mut u32| panic!("timer exploded"));
	timers.after_func(Duration::from_secs(2), |count: &mut u32| *count += 1);
	run_next(&mut timers, &mut count).await;
	run_next(&mut timers, &mut count).await;
	assert_eq!(count, 1);
}

#[tokio::test(start_paused = true)]
async fn cron_rearms_until_stopped() {
	let mut timers = dispatcher::<u32>();
	let mut count = 0;

	let cron = timers.cron_func(every_second(), |count: &mut u32| *count += 1);
	for _ in 0..3 {
		run_next(&mut timers, &mut count).await;
	}
	assert_eq!(count, 3);
	assert!(cron.is_armed());

	cron.stop();
	assert!(!cron.is_armed());
	assert!(tokio::time::timeout(Duration::from_secs(5), timers.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn cron_can_stop_itself_from_its_callback() {
	struct Ticker {
		ticks: u32,
		cron: Option<Cron<Ticker>>,
	}

	let mut timers = dispatcher::<Ticker>();
	let mut ticker = Ticker { ticks: 0, cron: None };
	ticker.cron = Some(timers.cron_func(every_second(), |ticker: &mut Ticker| {
		ticker.ticks += 1;
		if ticker.ticks == 2
			&& let Some(cron) = &ticker.cron
		{
			cron.stop();
		}
	}));

	run_next(&mut timers, &mut ticker).await;
	run_next(&mut timers, &mut ticker).await;
	assert_eq!(ticker.ticks, 2);
	assert!(tokio::time::timeout(Duration::from_secs(5), timers.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn stop_from_another_thread_during_rearm_prevents_later_occurrences() {
	struct StopOnRearm {
		calls: AtomicUsize,
		cron: Arc<Mutex<Option<Cron<u32>>>>,
	}

	impl Schedule for StopOnRearm {
		fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
			if self.calls.fetch_add(1, Ordering::SeqCst) == 1
				&& let Some(cron) = self.cron.lock().take()
			{
				std::thread::spawn(move || cron.stop()).join().unwrap();
			}
			Some(now + chrono::TimeDelta::seconds(1))
		}
	}

	let mut timers = dispatcher::<u32>();
	let mut count = 0;
	let slot = Arc::new(Mutex::new(None));
	let cron = timers.cron_func(
		StopOnRearm {
			calls: AtomicUsize::new(0),
			cron: Arc::clone(&slot),
		},
		|count: &mut u32| *count += 1,
	);
	*slot.lock() = Some(cron.clone());

	run_next(&mut timers, &mut count).await;
	assert_eq!(count, 1);
	assert!(!cron.is_armed());
	assert!(tokio::time::timeout(Duration::from_secs(5), timers.recv()).await.is_err());
	assert_eq!(count, 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_cron_callback_keeps_the_schedule() {
	let mut timers = dispatcher::<u32>();
	let mut count = 0;

	let cron = timers.cron_func(every_second(), |count: &mut u32| {
		*count += 1;
		if *count == 1 {
			panic!("first tick exploded");
		}
	});
	run_next(&mut timers, &mut count).await;
	run_next(&mut timers, &mut count).await;
	assert_eq!(count, 2);
	cron.stop();
}

#[tokio::test(start_paused = true)]
async fn exhausted_schedule_yields_an_inert_cron() {
	struct Never;

	impl Schedule for Never {
		fn next_after(&self, _: DateTime<Local>) -> Option<DateTime<Local>> {
			None
		}
	}

	let mut timers = dispatcher::<u32>();
	let cron = timers.cron_func(Never, |count: &mut u32| *count += 1);
	assert!(!cron.is_armed());
	cron.stop();
	assert!(tokio::time::timeout(Duration::from_secs(5), timers.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn single_occurrence_cron_fires_once_and_stops_cleanly() {
	struct Once(AtomicBool);

	impl Schedule for Once {
		fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
			(!self.0.swap(true, Ordering::SeqCst)).then(|| now + chrono::TimeDelta::seconds(1))
		}
	}

	let mut timers = dispatcher::<u32>();
	let mut count = 0;
	let cron = timers.cron_func(Once(AtomicBool::new(false)), |count: &mut u32| *count += 1);
	assert!(cron.is_armed());

	run_next(&mut timers, &mut count).await;
	assert_eq!(count, 1);
	assert!(!cron.is_armed());
	cron.stop();
	assert!(tokio::time::timeout(Duration::from_secs(5), timers.recv()).await.is_err());
	assert_eq!(count, 1);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_armed_and_discards_fired_timers() {
	let mut timers = dispatcher::<u32>();
	let handle = timers.handle();

	let fired = timers.after_func(Duration::from_secs(1), |count: &mut u32| *count += 1);
	let armed = handle.after_func(Duration::from_secs(60), |count: &mut u32| *count += 1);
	let cron = timers.cron_func(every_second(), |count: &mut u32| *count += 1);
	tokio::time::sleep(Duration::from_millis(1500)).await;
	assert!(!timers.is_empty());

	assert!(timers.close() >= 1);
	assert!(handle.is_closed());
	tokio::task::yield_now().await;
	assert!(!fired.is_active());
	assert!(!armed.is_active());
	assert!(!cron.is_armed());
	assert_eq!(timers.recv().await.map(|_| ()), None);
}
