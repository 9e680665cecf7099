use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "expr.pest"]
pub struct ExprParser;
