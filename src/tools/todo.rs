//! Session todo list the model can maintain.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{str_arg, ToolArgs, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

#[derive(Debug, Clone)]
pub struct TodoItem {
    pub task: String,
    pub done: bool,
    pub created: DateTime<Local>,
    pub completed: Option<DateTime<Local>>,
}

pub type TodoList = Arc<Mutex<Vec<TodoItem>>>;

#[derive(Clone, Copy)]
enum TodoAction {
    Add,
    List,
    MarkDone,
    Flush,
}

struct TodoTool {
    todos: TodoList,
    action: TodoAction,
}

/// Registers the todo tools over one shared list and returns that list.
pub fn register(registry: &mut ToolRegistry) -> Result<TodoList, ToolError> {
    let todos = TodoList::default();
    let tool = |action| TodoTool {
        todos: todos.clone(),
        action,
    };

    registry.register(ToolDescriptor::new(
        "add_todo",
        "Add a task to the todo list.",
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "What needs doing." }
            },
            "required": ["task"],
            "additionalProperties": false
        }),
        tool(TodoAction::Add),
    ))?;
    registry.register(ToolDescriptor::new(
        "list_todos",
        "Show every todo with its number and status.",
        json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        tool(TodoAction::List),
    ))?;
    registry.register(ToolDescriptor::new(
        "mark_todo_done",
        "Mark a todo as completed.",
        json!({
            "type": "object",
            "properties": {
                "index": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Number of the todo as shown by list_todos (starting at 1)."
                }
            },
            "required": ["index"],
            "additionalProperties": false
        }),
        tool(TodoAction::MarkDone),
    ))?;
    registry.register(ToolDescriptor::new(
        "flush_todos",
        "Delete every todo.",
        json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        tool(TodoAction::Flush),
    ))?;

    Ok(todos)
}

#[async_trait]
impl ToolHandler for TodoTool {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let mut todos = self.todos.lock().await;
        match self.action {
            TodoAction::Add => {
                let task = str_arg(args, "task")?.trim().to_string();
                if task.is_empty() {
                    return Err(ToolError::Validation("task must not be empty".into()));
                }
                let reply = format!("Added todo: '{task}'");
                todos.push(TodoItem {
                    task,
                    done: false,
                    created: Local::now(),
                    completed: None,
                });
                Ok(reply)
            }
            TodoAction::List => {
                if todos.is_empty() {
                    return Ok("No todos found. Add one with add_todo.".to_string());
                }
                let mut lines = vec!["Todo list:".to_string()];
                for (i, todo) in todos.iter().enumerate() {
                    let status = if todo.done { "✓" } else { "○" };
                    lines.push(format!("{}. [{status}] {}", i + 1, todo.task));
                }
                Ok(lines.join("\n"))
            }
            TodoAction::MarkDone => {
                let index = args
                    .get("index")
                    .and_then(|value| value.as_u64())
                    .ok_or_else(|| ToolError::Validation("missing argument 'index'".into()))?;
                let count = todos.len();
                let todo = usize::try_from(index)
                    .ok()
                    .and_then(|index| index.checked_sub(1))
                    .and_then(|slot| todos.get_mut(slot))
                    .ok_or_else(|| {
                        ToolError::Execution(format!("No todo #{index}; the list has {count} item(s)."))
                    })?;
                todo.done = true;
                todo.completed = Some(Local::now());
                Ok(format!("Marked as done: '{}'", todo.task))
            }
            TodoAction::Flush => {
                let removed = todos.len();
                todos.clear();
                Ok(format!("Flushed todos. Deleted {removed} item(s)."))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{ToolCallRequest, ToolResult};

    async fn run(registry: &ToolRegistry, call: ToolCallRequest) -> ToolResult {
        let descriptor = registry.resolve(&call.name).unwrap();
        registry.execute(descriptor, &call).await
    }

    #[tokio::test]
    async fn todo_lifecycle() {
        let mut registry = ToolRegistry::new();
        let todos = register(&mut registry).unwrap();

        let empty = run(&registry, ToolCallRequest::new("list_todos")).await;
        assert_eq!(empty.payload, "No todos found. Add one with add_todo.");

        run(&registry, ToolCallRequest::new("add_todo").with_arg("task", "write tests")).await;
        run(&registry, ToolCallRequest::new("add_todo").with_arg("task", "ship it")).await;
        let done = run(&registry, ToolCallRequest::new("mark_todo_done").with_arg("index", "2")).await;
        assert!(done.success, "{}", done.payload);
        assert_eq!(done.payload, "Marked as done: 'ship it'");

        let listed = run(&registry, ToolCallRequest::new("list_todos")).await;
        assert_eq!(listed.payload, "Todo list:\n1. [○] write tests\n2. [✓] ship it");
        assert!(todos.lock().await[1].completed.is_some());

        let flushed = run(&registry, ToolCallRequest::new("flush_todos")).await;
        assert_eq!(flushed.payload, "Flushed todos. Deleted 2 item(s).");
        assert!(todos.lock().await.is_empty());
    }

    #[tokio::test]
    async fn bad_indices_fail_without_panicking() {
        let mut registry = ToolRegistry::new();
        register(&mut registry).unwrap();
        run(&registry, ToolCallRequest::new("add_todo").with_arg("task", "only")).await;

        let out_of_range = run(&registry, ToolCallRequest::new("mark_todo_done").with_arg("index", "5")).await;
        assert!(!out_of_range.success);
        assert_eq!(out_of_range.payload, "No todo #5; the list has 1 item(s).");

        let zero = run(&registry, ToolCallRequest::new("mark_todo_done").with_arg("index", "0")).await;
        assert!(!zero.success);
        assert!(zero.payload.starts_with("Invalid arguments:"));

        let word = run(&registry, ToolCallRequest::new("mark_todo_done").with_arg("index", "two")).await;
        assert!(!word.success);
        assert!(word.payload.starts_with("Invalid arguments:"));
    }
}
