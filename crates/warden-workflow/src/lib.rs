#![doc = r#"
# warden-workflow

## 设计动机（Why）
- **规则路由**：把访问请求交给哪个处理器由声明式规则决定，处理器只负责给出决策；
- **有序监听**：事件按到达顺序串行分发，取消与故障都有明确的终态。

## 核心契约（What）
- [`RequestRouter`]：按注册顺序匹配，先注册者优先，每个事件至多调用一个处理器；
- [`WorkflowWatcher`]：`Idle → Watching → Stopped | Faulted`，处理器与回写失败交给 [`ErrorSink`]，
  流故障使监听器进入 `Faulted` 并由 [`WorkflowWatcher::wait`] 返回；
- 同一客户端上可以并行运行多个相互独立的监听器。

## 风险与考量（Trade-offs）
- 处理器在读取任务中同步执行，耗时的处理器会推迟后续事件；需要并行处理的场景应使用多个监听器。
- 客户端切换连接后事件流随旧连接结束，监听器进入 `Faulted`，调用方需以新的监听器重新订阅。
"#]

mod router;
mod watcher;

pub use router::{AccessHandler, Dispatch, MatchRule, RequestRouter, Route, WILDCARD};
pub use watcher::{ErrorSink, TracingErrorSink, WatcherState, WorkflowWatcher};
