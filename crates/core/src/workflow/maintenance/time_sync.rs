//! Clock synchronization: read the engine clock, then set it from the host.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rps_protocol::wsman::amt;
use rps_runtime::StatusCategory;

use crate::error::Result;
use crate::workflow::{Context, Flow, Workflow, check_return};

const GET_METHOD: &str = "GetLowAccuracyTimeSynch";
const SET_METHOD: &str = "SetHighAccuracyTimeSynch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	GetLowAccuracyTime,
	SetHighAccuracyTime,
}

#[derive(Debug, Default)]
pub struct TimeSync {
	ta0: Option<i64>,
}

impl TimeSync {
	pub fn new() -> Self {
		Self::default()
	}
}

fn now_secs() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
}

#[async_trait]
impl Workflow for TimeSync {
	type State = State;

	const NAME: &'static str = "time-sync";
	const CATEGORY: StatusCategory = StatusCategory::Overall;

	fn initial(&self) -> State {
		State::GetLowAccuracyTime
	}

	async fn step(&mut self, cx: &Context, state: State) -> Result<Flow<State>> {
		match state {
			State::GetLowAccuracyTime => {
				let response = cx.invoke(&amt::get_low_accuracy_time_synch()).await?;
				if let Err(reason) = check_return(&response, GET_METHOD) {
					return Ok(Flow::Fail(reason));
				}
				let ta0 = response.output(GET_METHOD).and_then(|out| out.get("Ta0")).and_then(|v| v.as_str()).and_then(|v| v.parse().ok());
				match ta0 {
					Some(ta0) => {
						self.ta0 = Some(ta0);
						Ok(Flow::Continue(State::SetHighAccuracyTime))
					}
					None => Ok(Flow::Fail(format!("{GET_METHOD} reply has no Ta0"))),
				}
			}
			State::SetHighAccuracyTime => {
				let Some(ta0) = self.ta0 else {
					return Ok(Flow::Retry(State::GetLowAccuracyTime));
				};
				let tm1 = now_secs();
				let response = cx.invoke(&amt::set_high_accuracy_time_synch(ta0, tm1, tm1)).await?;
				Ok(match check_return(&response, SET_METHOD) {
					Ok(()) => Flow::Succeed,
					Err(reason) => Flow::Fail(reason),
				})
			}
		}
	}

	fn success_status(&self) -> String {
		"Time Synchronized".into()
	}
}
