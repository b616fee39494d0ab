mod executions;
mod workflows;
