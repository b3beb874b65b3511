//! General matrix multiply.
//!
//! Computes `C = alpha * op(A) * op(B) + beta * C` on row-major buffers where
//! `op(X)` is `X` or `Xᵀ`. `m × k` is the shape of `op(A)`, `k × n` the shape of
//! `op(B)` and `m × n` the shape of `C`. Leading dimensions are the row strides of
//! the buffers as stored, before any transposition.
//!
//! The portable kernel below is always available. Building with the `blas`
//! feature routes the call to the system `sgemm` instead.

#[cfg(feature = "blas")]
extern crate blas_src;

/// Row-major GEMM with optional operand transposition.
///
/// # Panics
///
/// Panics if any buffer is too short for the requested dimensions.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    transpose_a: bool,
    transpose_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) {
    if m == 0 || n == 0 {
        return;
    }
    let (rows_a, cols_a) = if transpose_a { (k, m) } else { (m, k) };
    let (rows_b, cols_b) = if transpose_b { (n, k) } else { (k, n) };
    assert!(
        fits(a.len(), rows_a, cols_a, lda),
        "gemm: A does not hold {rows_a} x {cols_a} with lda {lda}"
    );
    assert!(
        fits(b.len(), rows_b, cols_b, ldb),
        "gemm: B does not hold {rows_b} x {cols_b} with ldb {ldb}"
    );
    assert!(
        fits(c.len(), m, n, ldc),
        "gemm: C does not hold {m} x {n} with ldc {ldc}"
    );

    #[cfg(feature = "blas")]
    {
        sgemm_blas(
            transpose_a,
            transpose_b,
            m,
            n,
            k,
            alpha,
            a,
            lda,
            b,
            ldb,
            beta,
            c,
            ldc,
        );
    }

    #[cfg(not(feature = "blas"))]
    {
        gemm_portable(
            transpose_a,
            transpose_b,
            m,
            n,
            k,
            alpha,
            a,
            lda,
            b,
            ldb,
            beta,
            c,
            ldc,
        );
    }
}

/// Whether a row-major `rows × cols` matrix with row stride `ld` fits in `len` values.
fn fits(len: usize, rows: usize, cols: usize, ld: usize) -> bool {
    rows == 0 || cols == 0 || (ld >= cols && len >= (rows - 1) * ld + cols)
}

#[cfg(feature = "blas")]
#[allow(clippy::too_many_arguments)]
fn sgemm_blas(
    transpose_a: bool,
    transpose_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) {
    use cblas::{sgemm, Layout, Transpose};

    let trans = |flag: bool| {
        if flag {
            Transpose::Ordinary
        } else {
            Transpose::None
        }
    };

    // SAFETY: `gemm` asserted that every operand spans its leading dimension and
    // length, so sgemm stays inside the slices. C is an exclusive borrow and
    // cannot alias A or B.
    unsafe {
        sgemm(
            Layout::RowMajor,
            trans(transpose_a),
            trans(transpose_b),
            m as i32,
            n as i32,
            k as i32,
            alpha,
            a,
            lda as i32,
            b,
            ldb as i32,
            beta,
            c,
            ldc as i32,
        );
    }
}

#[cfg_attr(feature = "blas", allow(dead_code))]
#[allow(clippy::too_many_arguments)]
fn gemm_portable(
    transpose_a: bool,
    transpose_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) {
    if beta != 1.0 {
        for i in 0..m {
            for value in &mut c[i * ldc..i * ldc + n] {
                *value *= beta;
            }
        }
    }

    match (transpose_a, transpose_b) {
        (false, false) => {
            for i in 0..m {
                for p in 0..k {
                    let a_part = alpha * a[i * lda + p];
                    if a_part == 0.0 {
                        continue;
                    }
                    let b_row = &b[p * ldb..p * ldb + n];
                    let c_row = &mut c[i * ldc..i * ldc + n];
                    for (c_value, &b_value) in c_row.iter_mut().zip(b_row) {
                        *c_value += a_part * b_value;
                    }
                }
            }
        }
        (false, true) => {
            for i in 0..m {
                let a_row = &a[i * lda..i * lda + k];
                for j in 0..n {
                    let b_row = &b[j * ldb..j * ldb + k];
                    let sum: f32 = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
                    c[i * ldc + j] += alpha * sum;
                }
            }
        }
        (true, false) => {
            for i in 0..m {
                for p in 0..k {
                    let a_part = alpha * a[p * lda + i];
                    if a_part == 0.0 {
                        continue;
                    }
                    let b_row = &b[p * ldb..p * ldb + n];
                    let c_row = &mut c[i * ldc..i * ldc + n];
                    for (c_value, &b_value) in c_row.iter_mut().zip(b_row) {
                        *c_value += a_part * b_value;
                    }
                }
            }
        }
        (true, true) => {
            for i in 0..m {
                for j in 0..n {
                    let mut sum = 0.0f32;
                    for p in 0..k {
                        sum += a[p * lda + i] * b[j * ldb + p];
                    }
                    c[i * ldc + j] += alpha * sum;
                }
            }
        }
    }
}
