//! 可取消、可设置截止时间的请求上下文。
//!
//! `Context` 以父子树的形式传播取消信号：子 Context 继承父级的取消与更早的截止时间，
//! 取消子级不会影响父级。请求级元数据（例如 [`Transport`](crate::Transport)）通过
//! 按类型索引的值表挂载在 Context 上，生命周期严格限定在单个请求之内。

use std::sync::Arc;
use std::time::Duration;

use http::Extensions;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ContextError;

#[derive(Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Arc<Extensions>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Context {
    /// 永不取消、没有截止时间的根 Context。
    pub fn background() -> Self {
        Self::default()
    }

    /// 派生可取消的子 Context。返回的守卫在 drop 时取消子 Context。
    pub fn with_cancel(&self) -> (Context, DropGuard) {
        let token = self.token.child_token();
        let guard = token.clone().drop_guard();
        let ctx = Context {
            token,
            deadline: self.deadline,
            values: Arc::clone(&self.values),
        };
        (ctx, guard)
    }

    /// 派生带截止时间的子 Context，截止时间取父子中较早的一个。
    pub fn with_deadline(&self, deadline: Instant) -> (Context, DropGuard) {
        let (mut ctx, guard) = self.with_cancel();
        ctx.deadline = Some(match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        });
        (ctx, guard)
    }

    pub fn with_timeout(&self, timeout: Duration) -> (Context, DropGuard) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 挂载一个按类型索引的值，返回新的 Context；原 Context 不受影响。
    pub fn with_value<T>(&self, value: T) -> Context
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut values = (*self.values).clone();
        values.insert(value);
        Context {
            token: self.token.clone(),
            deadline: self.deadline,
            values: Arc::new(values),
        }
    }

    pub fn value<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.values.get::<T>()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 主动取消当前 Context 及其所有子 Context。
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Context 是否已结束；未结束时返回 `None`。
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// 等待 Context 结束（被取消或到达截止时间）。
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Canceled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Marker(&'static str);

    #[test]
    fn test_background_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test]
    async fn test_drop_guard_cancels_child_only() {
        let parent = Context::background();
        let (child, guard) = parent.with_cancel();
        drop(guard);
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert!(parent.err().is_none());
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates() {
        let parent = Context::background();
        let (child, _guard) = parent.with_cancel();
        parent.cancel();
        assert_eq!(child.done().await, ContextError::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_deadline_exceeded() {
        let (ctx, _guard) = Context::background().with_timeout(Duration::from_millis(50));
        assert!(ctx.err().is_none());
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_parent_deadline() {
        let (parent, _pg) = Context::background().with_timeout(Duration::from_millis(10));
        let (child, _cg) = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_values_are_scoped_to_derived_context() {
        let root = Context::background();
        let ctx = root.with_value(Marker("transport"));
        assert_eq!(ctx.value::<Marker>(), Some(&Marker("transport")));
        assert!(root.value::<Marker>().is_none());
        let (child, _guard) = ctx.with_cancel();
        assert_eq!(child.value::<Marker>(), Some(&Marker("transport")));
    }
}
