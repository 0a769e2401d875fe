use std::time::Duration;

use super::*;

#[derive(Debug, Default)]
struct Ledger {
	total: i64,
}

type Server = CallServer<&'static str, i64, Ledger>;
type Seen = Vec<Result<i64, CallError>>;

fn ledger_server(capacity: usize) -> Server {
	let mut server = Server::new(capacity).stack_buf_len(0);
	server
		.register(
			"add",
			Function::no_result(|ledger: &mut Ledger, args: Vec<i64>| ledger.total += args.iter().sum::<i64>()),
		)
		.unwrap();
	server.register("double", Function::single(|_: &mut Ledger, args: Vec<i64>| args[0] * 2)).unwrap();
	server
		.register(
			"split",
			Function::multi(|ledger: &mut Ledger, _: Vec<i64>| vec![ledger.total / 2, ledger.total - ledger.total / 2]),
		)
		.unwrap();
	server
		.register("boom", Function::single(|_: &mut Ledger, _: Vec<i64>| -> i64 { panic!("ledger exploded") }))
		.unwrap();
	server
}

async fn serve_one(server: &mut Server, ledger: &mut Ledger) {
	let request = server.recv().await.expect("server mailbox closed");
	server.exec(ledger, request);
}

#[test]
fn duplicate_registration_is_rejected() {
	let mut server = ledger_server(4);
	let err = server.register("add", Function::no_result(|_: &mut Ledger, _| {})).unwrap_err();
	assert_eq!(err, RegisterError::AlreadyRegistered { key: "\"add\"".to_string() });
}

#[test]
fn registration_after_handle_is_sealed() {
	let mut server = ledger_server(4);
	let handle = server.handle();
	let err = server.register("late", Function::no_result(|_: &mut Ledger, _| {})).unwrap_err();
	assert_eq!(err, RegisterError::Sealed { key: "\"late\"".to_string() });
	drop(handle);
}

#[tokio::test]
async fn sync_calls_run_against_owner_state() {
	let mut server = ledger_server(4);
	let mut ledger = Ledger::default();
	let mut client: CallClient<_, _, ()> = server.open(0);

	let (added, ()) = tokio::join!(client.call0("add", vec![3, 4]), serve_one(&mut server, &mut ledger));
	assert_eq!(added, Ok(()));
	assert_eq!(ledger.total, 7);

	let (doubled, ()) = tokio::join!(client.call1("double", vec![21]), serve_one(&mut server, &mut ledger));
	assert_eq!(doubled, Ok(42));

	let (halves, ()) = tokio::join!(client.calln("split", vec![]), serve_one(&mut server, &mut ledger));
	assert_eq!(halves, Ok(vec![3, 4]));
}

#[tokio::test]
async fn lookup_failures_do_not_reach_the_server() {
	let server = ledger_server(4);
	let handle = server.handle();

	assert_eq!(
		handle.call1("missing", vec![]).await,
		Err(CallError::NotRegistered { key: "\"missing\"".to_string() })
	);
	assert_eq!(
		handle.call0("double", vec![1]).await,
		Err(CallError::ArityMismatch {
			key: "\"double\"".to_string(),
			registered: Arity::Single,
			requested: Arity::NoResult,
		})
	);
	assert_eq!(server.pending(), 0);
}

#[tokio::test]
async fn panicking_function_faults_the_call_and_server_keeps_serving() {
	let mut server = ledger_server(4);
	let mut ledger = Ledger::default();
	let handle = server.handle();

	let (faulted, ()) = tokio::join!(handle.call1("boom", vec![]), serve_one(&mut server, &mut ledger));
	match faulted {
		Err(CallError::Faulted(fault)) => assert_eq!(fault.message(), "ledger exploded"),
		other => panic!("expected fault, got {other:?}"),
	}

	let (doubled, ()) = tokio::join!(handle.call1("double", vec![5]), serve_one(&mut server, &mut ledger));
	assert_eq!(doubled, Ok(10));
}

#[tokio::test]
async fn go_ignores_unknown_keys_and_drops_when_full() {
	let mut server = ledger_server(1);
	let mut ledger = Ledger::default();

	server.go("missing", vec![1]);
	assert_eq!(server.pending(), 0);

	server.go("add", vec![1]);
	server.go("add", vec![100]);
	assert_eq!(server.pending(), 1);

	serve_one(&mut server, &mut ledger).await;
	assert_eq!(ledger.total, 1);
}

#[tokio::test]
async fn sync_call_waits_for_mailbox_room() {
	let mut server = ledger_server(1);
	let mut ledger = Ledger::default();
	let handle = server.handle();

	server.go("add", vec![2]);
	let call = tokio::spawn(async move { handle.call1("double", vec![8]).await });
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert!(!call.is_finished(), "call should wait while the mailbox is full");

	serve_one(&mut server, &mut ledger).await;
	serve_one(&mut server, &mut ledger).await;
	assert_eq!(call.await.unwrap(), Ok(16));
	assert_eq!(ledger.total, 2);
}

#[tokio::test]
async fn close_fails_queued_calls_and_rejects_new_ones() {
	let mut server = ledger_server(4);
	let handle = server.handle();
	let caller = handle.clone();

	server.go("add", vec![1]);
	let call = tokio::spawn(async move { caller.call1("double", vec![1]).await });
	while server.pending() < 2 {
		tokio::task::yield_now().await;
	}

	assert_eq!(server.close(), 2);
	assert_eq!(call.await.unwrap(), Err(CallError::ServerClosed));
	assert!(handle.is_closed());
	assert_eq!(handle.call0("add", vec![1]).await, Err(CallError::ServerClosed));
	handle.go("add", vec![1]);
	assert_eq!(server.pending(), 0);
}

#[tokio::test]
async fn close_fails_every_queued_call_with_a_return_channel() {
	let mut server = ledger_server(8);
	let handle = server.handle();
	let mut client: CallClient<_, _, Seen> = server.open(4);
	let mut seen = Seen::new();

	let sync_calls: Vec<_> = (1..=3)
		.map(|n| {
			let caller = handle.clone();
			tokio::spawn(async move { caller.call1("double", vec![n]).await })
		})
		.collect();
	for n in 1..=3 {
		client.asyn_call(&mut seen, "double", vec![n], Callback::single(|seen: &mut Seen, result| seen.push(result)));
	}
	server.go("add", vec![1]);
	while server.pending() < 7 {
		tokio::task::yield_now().await;
	}

	assert_eq!(server.close(), 7);
	assert_eq!(server.pending(), 0);
	for call in sync_calls {
		assert_eq!(call.await.unwrap(), Err(CallError::ServerClosed));
	}
	client.close(&mut seen).await;
	assert_eq!(seen, vec![Err(CallError::ServerClosed); 3]);
	assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn async_calls_beyond_capacity_are_rejected_locally() {
	let mut server = ledger_server(8);
	let mut ledger = Ledger::default();
	let mut client: CallClient<_, _, Seen> = server.open(2);
	let mut seen = Seen::new();

	for n in 1..=3 {
		client.asyn_call(&mut seen, "double", vec![n], Callback::single(|seen: &mut Seen, result| seen.push(result)));
	}
	assert_eq!(seen, vec![Err(CallError::TooManyCalls)]);
	assert_eq!(client.pending(), 2);
	assert_eq!(server.pending(), 2);

	serve_one(&mut server, &mut ledger).await;
	serve_one(&mut server, &mut ledger).await;
	while !client.idle() {
		let ret = client.recv().await.unwrap();
		client.cb(&mut seen, ret);
	}
	assert_eq!(seen, vec![Err(CallError::TooManyCalls), Ok(2), Ok(4)]);
}

#[tokio::test]
async fn zero_capacity_client_rejects_every_async_call() {
	let server = ledger_server(8);
	let client: CallClient<_, _, Seen> = server.open(0);
	let mut seen = Seen::new();

	client.asyn_call(&mut seen, "double", vec![1], Callback::single(|seen: &mut Seen, result| seen.push(result)));
	assert_eq!(seen, vec![Err(CallError::TooManyCalls)]);
	assert!(client.idle());
	assert_eq!(server.pending(), 0);
}

#[tokio::test]
async fn async_lookup_and_mailbox_failures_come_back_through_the_queue() {
	let server = ledger_server(1);
	let mut client: CallClient<_, _, Vec<CallError>> = server.open(4);
	let mut errors = Vec::new();

	client.asyn_call(
		&mut errors,
		"missing",
		vec![],
		Callback::no_result(|errors: &mut Vec<CallError>, result| errors.extend(result.err())),
	);
	client.asyn_call(
		&mut errors,
		"double",
		vec![1],
		Callback::multi(|errors: &mut Vec<CallError>, result| errors.extend(result.err())),
	);
	server.go("add", vec![1]);
	client.asyn_call(
		&mut errors,
		"add",
		vec![1],
		Callback::no_result(|errors: &mut Vec<CallError>, result| errors.extend(result.err())),
	);
	assert!(errors.is_empty(), "failures must not run before cb");
	assert_eq!(client.pending(), 3);

	client.close(&mut errors).await;
	assert!(client.idle());
	assert_eq!(
		errors,
		vec![
			CallError::NotRegistered { key: "\"missing\"".to_string() },
			CallError::ArityMismatch {
				key: "\"double\"".to_string(),
				registered: Arity::Single,
				requested: Arity::Multi,
			},
			CallError::ChannelFull,
		]
	);
}

#[tokio::test]
async fn panicking_callback_is_contained() {
	let mut server = ledger_server(4);
	let mut ledger = Ledger::default();
	let mut client: CallClient<_, _, Seen> = server.open(4);
	let mut seen = Seen::new();

	client.asyn_call(
		&mut seen,
		"double",
		vec![1],
		Callback::single(|_: &mut Seen, _| panic!("callback exploded")),
	);
	client.asyn_call(&mut seen, "double", vec![2], Callback::single(|seen: &mut Seen, result| seen.push(result)));
	serve_one(&mut server, &mut ledger).await;
	serve_one(&mut server, &mut ledger).await;

	client.close(&mut seen).await;
	assert!(client.idle());
	assert_eq!(seen, vec![Ok(4)]);
}

#[tokio::test]
async fn callbacks_can_issue_further_calls_through_a_caller() {
	struct Chain {
		caller: AsyncCaller<&'static str, i64, Chain>,
		results: Vec<i64>,
	}

	let mut server = ledger_server(4);
	let mut ledger = Ledger::default();
	let mut client: CallClient<_, _, Chain> = server.open(4);
	let mut chain = Chain {
		caller: client.caller(),
		results: Vec::new(),
	};

	client.asyn_call(
		&mut chain,
		"double",
		vec![3],
		Callback::single(|chain: &mut Chain, result| {
			let value = result.unwrap();
			chain.results.push(value);
			let caller = chain.caller.clone();
			caller.asyn_call(
				chain,
				"double",
				vec![value],
				Callback::single(|chain: &mut Chain, result| chain.results.push(result.unwrap())),
			);
		}),
	);

	serve_one(&mut server, &mut ledger).await;
	let ret = client.recv().await.unwrap();
	client.cb(&mut chain, ret);
	assert_eq!(client.pending(), 1);

	serve_one(&mut server, &mut ledger).await;
	client.close(&mut chain).await;
	assert_eq!(chain.results, vec![6, 12]);
}

#[tokio::test]
async fn run_serves_until_cancelled() {
	let mut server = ledger_server(4);
	let handle = server.handle();
	let close = tokio_util::sync::CancellationToken::new();
	let token = close.clone();
	let owner = tokio::spawn(async move {
		let mut ledger = Ledger::default();
		server.run(&mut ledger, &token).await;
		ledger
	});

	handle.call0("add", vec![5]).await.unwrap();
	assert_eq!(handle.call1("double", vec![5]).await, Ok(10));
	close.cancel();

	assert_eq!(owner.await.unwrap().total, 5);
	assert!(handle.is_closed());
}
