use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::ServerError;

/// 服务状态：`Unstarted → Serving → Stopped`，Stopped 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unstarted,
    Serving,
    Stopped,
}

pub(crate) struct Lifecycle {
    state: watch::Sender<State>,
    /// 停止接受新连接，并通知已有连接优雅关闭
    pub(crate) shutdown: CancellationToken,
    /// 放弃等待，直接中断剩余连接
    pub(crate) force: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        let (state, _) = watch::channel(State::Unstarted);
        Self {
            state,
            shutdown: CancellationToken::new(),
            force: CancellationToken::new(),
        }
    }
}

impl Lifecycle {
    pub(crate) fn state(&self) -> State {
        *self.state.borrow()
    }

    /// 进入 Serving。返回 `Ok(false)` 表示服务已被停止，不应再启动。
    pub(crate) fn begin(&self) -> Result<bool, ServerError> {
        let mut previous = State::Unstarted;
        self.state.send_if_modified(|state| {
            previous = *state;
            if *state == State::Unstarted {
                *state = State::Serving;
                true
            } else {
                false
            }
        });
        match previous {
            State::Unstarted => Ok(true),
            State::Serving => Err(ServerError::AlreadyStarted),
            State::Stopped => Ok(false),
        }
    }

    pub(crate) fn finish(&self) {
        self.state.send_replace(State::Stopped);
    }

    /// 发出关停信号。服务尚未启动或已经停止时返回 `true`。
    pub(crate) fn request_stop(&self) -> bool {
        self.shutdown.cancel();
        let mut stopped = false;
        self.state.send_if_modified(|state| match state {
            State::Unstarted => {
                *state = State::Stopped;
                stopped = true;
                true
            }
            State::Stopped => {
                stopped = true;
                false
            }
            State::Serving => false,
        });
        stopped
    }

    /// 等待服务循环退出；`ctx` 先结束时强制中断剩余连接并返回错误。
    pub(crate) async fn wait_stopped(&self, ctx: &Context) -> Result<(), ServerError> {
        let mut rx = self.state.subscribe();
        tokio::select! {
            biased;
            _ = rx.wait_for(|state| *state == State::Stopped) => Ok(()),
            err = ctx.done() => {
                self.force.cancel();
                Err(ServerError::Shutdown(err))
            }
        }
    }
}
