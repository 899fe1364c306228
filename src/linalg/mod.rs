//! Sparse linear algebra and basis factorization.
//!
//! Three container kinds for the constraint matrix `A`: a CSC/CSR pair for
//! fast column and row access plus a dense `m x n` mirror for hot paths that
//! touch every entry. The factorization family lives behind a single
//! [`factorization::BasisFactorization`] trait with four variants, chosen
//! once at construction time.

pub mod dense_lu;
pub mod factorization;
pub mod forrest_tomlin;
pub mod sparse;
pub mod sparse_lu;
pub mod vector_ops;
