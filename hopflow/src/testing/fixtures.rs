//! Ready-made flow definitions used across the test suites.

use anyhow::Context as _;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::Operation;
use crate::errors::DagError;
use crate::pipeline::{Dag, DefinitionContext, FlowDefinition, Pipeline};

/// Parses a decimal number from a payload.
pub fn parse_number(data: &[u8]) -> anyhow::Result<i64> {
    let text = std::str::from_utf8(data).context("payload is not utf-8")?;
    text.trim()
        .parse()
        .with_context(|| format!("'{text}' is not a number"))
}

fn doubled() -> Operation {
    Operation::modifier(|data| Ok(Some((parse_number(data)? * 2).to_string().into_bytes())))
}

fn json_of(inputs: &BTreeMap<String, Vec<u8>>) -> anyhow::Result<Option<Vec<u8>>> {
    let map: BTreeMap<&str, String> = inputs
        .iter()
        .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v).into_owned()))
        .collect();
    Ok(Some(serde_json::to_vec(&map)?))
}

/// `A -> {B, C} -> D`.
///
/// `A` doubles its number, `B` and `C` call the echoing functions `b` and
/// `c`, `D` receives `{"B": .., "C": ..}` as JSON and sums the values.
#[must_use]
pub fn diamond() -> Arc<dyn FlowDefinition> {
    Arc::new(|p: &mut Pipeline, _: &DefinitionContext| -> anyhow::Result<()> {
        let dag = p.dag_mut();
        dag.add_vertex("A", vec![doubled()])?;
        dag.add_vertex("B", vec![Operation::function("b")])?;
        dag.add_vertex("C", vec![Operation::function("c")])?;
        dag.add_vertex(
            "D",
            vec![Operation::modifier(|data| {
                let inputs: BTreeMap<String, String> = serde_json::from_slice(data)?;
                let mut sum = 0;
                for value in inputs.values() {
                    sum += parse_number(value.as_bytes())?;
                }
                Ok(Some(sum.to_string().into_bytes()))
            })],
        )?;
        dag.add_edge("A", "B")?;
        dag.add_edge("A", "C")?;
        dag.add_edge("B", "D")?;
        dag.add_edge("C", "D")?;
        dag.set_aggregator("D", json_of)?;
        Ok(())
    })
}

fn tagging(tag: &'static str) -> Result<Dag, DagError> {
    let mut dag = Dag::new();
    dag.add_vertex(
        "x",
        vec![Operation::modifier(move |data| {
            Ok(Some([data, &b":"[..], tag.as_bytes()].concat()))
        })],
    )?;
    Ok(dag)
}

/// `A -> D(condition) -> E` where `D` picks branch `even` or `odd` from the
/// parity of `A`'s output and the chosen branch tags the number.
#[must_use]
pub fn even_odd() -> Arc<dyn FlowDefinition> {
    Arc::new(|p: &mut Pipeline, _: &DefinitionContext| -> anyhow::Result<()> {
        let mut branches = BTreeMap::new();
        branches.insert("even".to_string(), tagging("even")?);
        branches.insert("odd".to_string(), tagging("odd")?);

        let dag = p.dag_mut();
        dag.add_vertex("A", vec![Operation::function("a")])?;
        dag.add_condition(
            "D",
            |data| {
                let n = parse_number(data).ok()?;
                Some(vec![if n % 2 == 0 { "even" } else { "odd" }.to_string()])
            },
            branches,
        )?;
        dag.set_sub_aggregator("D", |results| Ok(results.values().next().cloned()))?;
        dag.add_vertex("E", Vec::new())?;
        dag.add_edge("A", "D")?;
        dag.add_edge("D", "E")?;
        Ok(())
    })
}

/// `F(foreach) -> G`. `F` splits a comma separated list into one branch per
/// item; each branch lowercases its item; the sub-aggregator joins the
/// results in key order.
#[must_use]
pub fn foreach_letters() -> Arc<dyn FlowDefinition> {
    Arc::new(|p: &mut Pipeline, _: &DefinitionContext| -> anyhow::Result<()> {
        let mut inner = Dag::new();
        inner.add_vertex(
            "lower",
            vec![Operation::modifier(|data| Ok(Some(data.to_ascii_lowercase())))],
        )?;

        let dag = p.dag_mut();
        dag.add_foreach(
            "F",
            |data| {
                Some(
                    data.split(|b| *b == b',')
                        .filter(|item| !item.is_empty())
                        .map(|item| (String::from_utf8_lossy(item).into_owned(), item.to_vec()))
                        .collect(),
                )
            },
            inner,
        )?;
        dag.set_sub_aggregator("F", |results| {
            let joined: Vec<&[u8]> = results.values().map(Vec::as_slice).collect();
            Ok(Some(joined.join(&b","[..])))
        })?;
        dag.add_vertex("G", vec![Operation::function("g")])?;
        dag.add_edge("F", "G")?;
        Ok(())
    })
}

/// `A -> S -> B` where `S` is a plain sub-DAG `x -> y`. Every node appends
/// its name to the payload.
#[must_use]
pub fn nested() -> Arc<dyn FlowDefinition> {
    fn append(name: &'static str) -> Vec<Operation> {
        vec![Operation::modifier(move |data| {
            Ok(Some([data, name.as_bytes()].concat()))
        })]
    }

    Arc::new(|p: &mut Pipeline, _: &DefinitionContext| -> anyhow::Result<()> {
        let mut inner = Dag::new();
        inner.add_vertex("x", append("x"))?;
        inner.add_vertex("y", append("y"))?;
        inner.add_edge("x", "y")?;

        let dag = p.dag_mut();
        dag.add_vertex("A", append("A"))?;
        dag.add_sub_dag("S", inner)?;
        dag.add_vertex("B", append("B"))?;
        dag.add_edge("A", "S")?;
        dag.add_edge("S", "B")?;
        Ok(())
    })
}
